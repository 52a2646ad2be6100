//! Typed interfaces over dynamic objects
//!
//! [`ScriptInterface`] is implemented by the structs that
//! [`script_interface!`](crate::script_interface) generates.

use crate::binding::MethodDescriptor;
use crate::interceptor::Interceptor;

/// A typed view of a dynamic object
pub trait ScriptInterface: Sized {
    /// Descriptors of every declared method
    fn methods() -> Vec<MethodDescriptor>;

    fn from_interceptor(interceptor: Interceptor) -> Self;

    fn interceptor(&self) -> &Interceptor;
}

/// Declare a typed interface over a dynamic object.
///
/// Generates a struct whose methods forward to an [`Interceptor`]. Each
/// method's shape decides which front end it uses:
///
/// | declaration                  | returns                              |
/// |------------------------------|--------------------------------------|
/// | `fn f(..) -> T;`             | `ProxyResult<T>`                     |
/// | `fn f(..);`                  | `ProxyResult<()>` (result discarded) |
/// | `fn f(..) -> Opaque;`        | `ProxyResult<Opaque>` (passthrough)  |
/// | `async fn f(..) -> T;`       | `ProxyResult<ScriptFuture<T>>`       |
///
/// `#[script(member = "name")]` binds a method to a differently named member
/// and `#[script(async)]` declares the async calling convention. Doc comments
/// go before the `#[script]` attribute.
///
/// ```rust,ignore
/// script_interface! {
///     /// Expression evaluator
///     pub struct Evaluator {
///         #[script(member = "evalSync")]
///         fn eval_sync(expression: String) -> Opaque;
///         #[script(member = "eval", async)]
///         async fn eval(expression: String) -> Json<serde_json::Value>;
///         #[script(member = "addTransform")]
///         fn add_transform(name: String, transform: HostFunction);
///     }
/// }
/// ```
#[macro_export]
macro_rules! script_interface {
    // ------------------------------------------------------------------
    // Method parsing: normalize each declaration into
    // (shape, [docs], [options], name, [args], return type)
    // ------------------------------------------------------------------
    (@parse $vis:vis $name:ident [$($acc:tt)*]) => {
        $crate::script_interface!(@emit $vis $name [$($acc)*]);
    };
    (@parse $vis:vis $name:ident [$($acc:tt)*]
        $(#[doc = $doc:literal])* $(#[script($($opt:tt)*)])?
        async fn $method:ident ($($arg:ident : $argty:ty),* $(,)?) -> $ret:ty ;
        $($rest:tt)*
    ) => {
        $crate::script_interface!(@parse $vis $name [$($acc)*
            (future, [$($doc),*], [$($($opt)*)?], $method, [$($arg : $argty),*], $ret)
        ] $($rest)*);
    };
    (@parse $vis:vis $name:ident [$($acc:tt)*]
        $(#[doc = $doc:literal])* $(#[script($($opt:tt)*)])?
        fn $method:ident ($($arg:ident : $argty:ty),* $(,)?) -> Opaque ;
        $($rest:tt)*
    ) => {
        $crate::script_interface!(@parse $vis $name [$($acc)*
            (any, [$($doc),*], [$($($opt)*)?], $method, [$($arg : $argty),*], $crate::Opaque)
        ] $($rest)*);
    };
    (@parse $vis:vis $name:ident [$($acc:tt)*]
        $(#[doc = $doc:literal])* $(#[script($($opt:tt)*)])?
        fn $method:ident ($($arg:ident : $argty:ty),* $(,)?) -> $ret:ty ;
        $($rest:tt)*
    ) => {
        $crate::script_interface!(@parse $vis $name [$($acc)*
            (value, [$($doc),*], [$($($opt)*)?], $method, [$($arg : $argty),*], $ret)
        ] $($rest)*);
    };
    (@parse $vis:vis $name:ident [$($acc:tt)*]
        $(#[doc = $doc:literal])* $(#[script($($opt:tt)*)])?
        fn $method:ident ($($arg:ident : $argty:ty),* $(,)?) ;
        $($rest:tt)*
    ) => {
        $crate::script_interface!(@parse $vis $name [$($acc)*
            (void, [$($doc),*], [$($($opt)*)?], $method, [$($arg : $argty),*], ())
        ] $($rest)*);
    };

    // ------------------------------------------------------------------
    // Code generation
    // ------------------------------------------------------------------
    (@emit $vis:vis $name:ident [$(
        ($shape:ident, [$($doc:literal),*], [$($opt:tt)*], $method:ident, [$($arg:ident : $argty:ty),*], $ret:ty)
    )*]) => {
        impl $name {
            $(
                $(#[doc = $doc])*
                pub fn $method(&self, $($arg: $argty),*) -> $crate::script_interface!(@returns $shape $ret) {
                    static DESCRIPTOR: ::std::sync::OnceLock<$crate::MethodDescriptor> =
                        ::std::sync::OnceLock::new();
                    let descriptor = DESCRIPTOR.get_or_init(|| {
                        $crate::script_interface!(@descriptor $method, [$($argty),*], $shape, $ret, $($opt)*)
                    });
                    let args: ::std::vec::Vec<$crate::HostValue> =
                        vec![$($crate::IntoScript::into_script($arg)),*];
                    $crate::script_interface!(@invoke $shape, self, descriptor, args, $ret)
                }
            )*
        }

        impl $crate::ScriptInterface for $name {
            fn methods() -> ::std::vec::Vec<$crate::MethodDescriptor> {
                vec![$(
                    $crate::script_interface!(@descriptor $method, [$($argty),*], $shape, $ret, $($opt)*)
                ),*]
            }

            fn from_interceptor(interceptor: $crate::Interceptor) -> Self {
                Self { interceptor }
            }

            fn interceptor(&self) -> &$crate::Interceptor {
                &self.interceptor
            }
        }
    };

    (@returns value $ret:ty) => { $crate::ProxyResult<$ret> };
    (@returns void $ret:ty) => { $crate::ProxyResult<()> };
    (@returns any $ret:ty) => { $crate::ProxyResult<$crate::Opaque> };
    (@returns future $ret:ty) => { $crate::ProxyResult<$crate::ScriptFuture<$ret>> };

    (@invoke value, $self:ident, $d:ident, $args:ident, $ret:ty) => { $self.interceptor.call::<$ret>($d, $args) };
    (@invoke void, $self:ident, $d:ident, $args:ident, $ret:ty) => { $self.interceptor.call_void($d, $args) };
    (@invoke any, $self:ident, $d:ident, $args:ident, $ret:ty) => { $self.interceptor.call_any($d, $args) };
    (@invoke future, $self:ident, $d:ident, $args:ident, $ret:ty) => { $self.interceptor.call_async::<$ret>($d, $args) };

    (@descriptor $method:ident, [$($argty:ty),*], future, $ret:ty, $($opt:tt)*) => {
        $crate::script_interface!(@options
            $crate::MethodDescriptor::new(stringify!($method))
                $(.param::<$argty>())*
                .returns::<$crate::ScriptFuture<$ret>>() ;
            $($opt)*)
    };
    (@descriptor $method:ident, [$($argty:ty),*], $shape:ident, $ret:ty, $($opt:tt)*) => {
        $crate::script_interface!(@options
            $crate::MethodDescriptor::new(stringify!($method))
                $(.param::<$argty>())*
                .returns::<$ret>() ;
            $($opt)*)
    };

    (@options $d:expr ;) => { $d };
    (@options $d:expr ; member = $member:literal $(, $($rest:tt)*)?) => {
        $crate::script_interface!(@options $d.member($member) ; $($($rest)*)?)
    };
    (@options $d:expr ; async $(, $($rest:tt)*)?) => {
        $crate::script_interface!(@options $d.asynchronous() ; $($($rest)*)?)
    };

    // ------------------------------------------------------------------
    // Entry point
    // ------------------------------------------------------------------
    ($(#[$meta:meta])* $vis:vis struct $name:ident { $($body:tt)* }) => {
        $(#[$meta])*
        #[derive(Clone)]
        $vis struct $name {
            interceptor: $crate::Interceptor,
        }

        $crate::script_interface!(@parse $vis $name [] $($body)*);
    };
}
