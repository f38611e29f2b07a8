//! Instrumentation macros

/// Path of the enclosing function, e.g. `my_crate::module::function`
///
/// Closures report their enclosing function.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn __scope_trace_marker() {}
        fn __scope_trace_type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let mut name = __scope_trace_type_name_of(__scope_trace_marker);
        name = name.strip_suffix("::__scope_trace_marker").unwrap_or(name);
        while let Some(outer) = name.strip_suffix("::{{closure}}") {
            name = outer;
        }
        name
    }};
}

/// [`SourceLoc`](crate::SourceLoc) of the macro call site
#[macro_export]
macro_rules! source_loc {
    () => {
        $crate::SourceLoc::new($crate::function_name!(), ::core::file!(), ::core::line!())
    };
}

/// Record the rest of the enclosing block as a frame
///
/// ```rust
/// use scope_trace::trace_scope;
///
/// fn load(path: &str) {
///     trace_scope!("load", path.to_owned());
///     // ...
/// }
/// # load("config.toml");
/// ```
///
/// Forms: `trace_scope!()`, `trace_scope!(name)`, `trace_scope!(name, payload)`.
/// The payload may be any `Send + Sync + 'static` value; read it back with
/// [`Frame::payload_as`](crate::Frame::payload_as) using the same type.
#[macro_export]
macro_rules! trace_scope {
    () => {
        let _scope_trace_guard = $crate::ScopeGuard::new($crate::ScopeArgs::new($crate::source_loc!()));
    };
    ($name:expr) => {
        let _scope_trace_guard =
            $crate::ScopeGuard::new($crate::ScopeArgs::new($crate::source_loc!()).name($name));
    };
    ($name:expr, $payload:expr) => {
        let _scope_trace_guard = $crate::ScopeGuard::new(
            $crate::ScopeArgs::new($crate::source_loc!())
                .name($name)
                .payload($crate::Payload::new($payload)),
        );
    };
}

/// Record the rest of the enclosing function, named after it
#[macro_export]
macro_rules! trace_function {
    () => {
        let _scope_trace_guard = {
            let loc = $crate::source_loc!();
            $crate::ScopeGuard::new($crate::ScopeArgs::new(loc).name(loc.function_basename()))
        };
    };
}
