//! Helper macros for ABI function generation.

/// Generate an exported `extern "C"` function.
///
/// # Usage
///
/// ```ignore
/// abi_fn! {
///     /// Takes no pointers.
///     fn mpibridge_thing(flag: c_int) -> c_int { ... }
/// }
///
/// abi_fn! {
///     /// Dereferences `out`.
///     unsafe fn mpibridge_read(out: *mut T) -> c_int { ... }
/// }
/// ```
///
/// The `unsafe fn` form expands to a `pub unsafe extern "C" fn` whose body
/// runs in an `unsafe` block; the plain form expands to a safe export.
macro_rules! abi_fn {
    (
        $(#[$meta:meta])*
        unsafe fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) -> $ret {
            unsafe { $body }
        }
    };

    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        pub extern "C" fn $name( $($arg : $argty),* ) -> $ret
        $body
    };
}

pub(crate) use abi_fn;
