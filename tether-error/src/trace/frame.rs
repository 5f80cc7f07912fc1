//! Frame descriptors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use std::path::Path;

/// One recorded call site of a captured stack trace.
///
/// `package` is the module path of the symbol (`my_service::store`),
/// `function` the rest of the symbol path (`get_user`, `Client::call`),
/// and `file` the base name of the source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub package: String,
    pub function: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u32,
}

impl Frame {
    /// Frame with every field given; `file` is kept as passed.
    pub fn new(
        package: impl Into<String>,
        function: impl Into<String>,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            package: package.into(),
            function: function.into(),
            file: file.into(),
            line,
        }
    }

    /// Describe the caller's location under an explicit name.
    ///
    /// Used where a symbol lookup would be unreliable (async bodies) but the
    /// site still wants to appear in a trace, e.g. an RPC interceptor.
    #[track_caller]
    pub fn here(package: &str, function: &str) -> Self {
        let loc = Location::caller();
        Self::new(package, function, base_name(loc.file()), loc.line())
    }

    /// Build a frame from a demangled symbol name and optional location.
    pub fn from_symbol(symbol: &str, file: Option<&Path>, line: Option<u32>) -> Self {
        let (package, function) = split_symbol(symbol);
        let file = file
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            package,
            function,
            file,
            line: line.unwrap_or(0),
        }
    }

    /// Full symbol path (`package::function`)
    pub fn qualified(&self) -> String {
        if self.package.is_empty() {
            self.function.clone()
        } else {
            format!("{}::{}", self.package, self.function)
        }
    }

    /// True for closures and async bodies
    pub fn is_lambda(&self) -> bool {
        self.function.contains("{{closure}}") || self.function.contains("{closure#")
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.file, self.line, self.qualified())
    }
}

fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Split a demangled symbol into `(package, function)`.
///
/// `a::b::Type::method` → (`a::b`, `Type::method`)
/// `<a::b::Type as c::Trait>::method` → (`a::b`, `Type::method`)
/// `<fn() -> T as c::Trait>::method` → (`c`, `Trait::method`)
/// `a::b::func` → (`a::b`, `func`)
pub(crate) fn split_symbol(symbol: &str) -> (String, String) {
    if let Some(rest) = symbol.strip_prefix('<') {
        if let Some(close) = matching_close(rest) {
            let (qualified, tail) = (&rest[..close], &rest[close + 1..]);
            let (ty, trait_path) = match find_top(qualified, " as ") {
                Some(at) => (&qualified[..at], Some(&qualified[at + 4..])),
                None => (qualified, None),
            };
            // fn pointers, references and bare type params have no module:
            // the trait is the only path that says where the code lives
            let path = match trait_path {
                Some(trait_path) if !is_module_path(ty) => trait_path,
                _ => ty,
            };
            let (package, name) = split_path(path);
            return (package, format!("{}{}", name, tail));
        }
    }
    split_path(symbol)
}

/// Byte offset of the `>` closing a `<` already consumed. `->` is not a
/// bracket.
fn matching_close(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut prev = '\0';
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' if prev != '-' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        prev = c;
    }
    None
}

/// First occurrence of `pat` outside any `<..>`, `(..)` or `[..]`
fn find_top(s: &str, pat: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut prev = '\0';
    for (i, c) in s.char_indices() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' if prev != '-' => depth -= 1,
            ')' | ']' => depth -= 1,
            _ => {}
        }
        if depth == 0 && s[i..].starts_with(pat) {
            return Some(i);
        }
        prev = c;
    }
    None
}

fn split_top<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(at) = find_top(rest, sep) {
        parts.push(&rest[..at]);
        rest = &rest[at + sep.len()..];
    }
    parts.push(rest);
    parts
}

fn is_module_path(ty: &str) -> bool {
    let named = ty.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_');
    named && !ty.starts_with("fn(") && !ty.starts_with("dyn ") && find_top(ty, "::").is_some()
}

fn split_path(path: &str) -> (String, String) {
    let segments = split_top(path, "::");
    if segments.len() < 2 {
        return (String::new(), path.to_string());
    }

    // closure segments belong to the function that encloses them
    let mut last = segments.len() - 1;
    while last > 0 && segments[last].starts_with('{') {
        last -= 1;
    }
    let split = segments[..last]
        .iter()
        .position(|s| s.starts_with(|c: char| c.is_ascii_uppercase() || c == '<'))
        .unwrap_or(last);

    (segments[..split].join("::"), segments[split..].join("::"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_free_function() {
        let (pkg, func) = split_symbol("my_service::store::get_user");
        assert_eq!(pkg, "my_service::store");
        assert_eq!(func, "get_user");
    }

    #[test]
    fn test_split_method() {
        let (pkg, func) = split_symbol("my_service::client::Client::call");
        assert_eq!(pkg, "my_service::client");
        assert_eq!(func, "Client::call");
    }

    #[test]
    fn test_split_trait_impl() {
        let (pkg, func) = split_symbol("<my_service::Handler as core::ops::Fn>::call");
        assert_eq!(pkg, "my_service");
        assert_eq!(func, "Handler::call");
    }

    #[test]
    fn test_split_closure() {
        let (pkg, func) = split_symbol("my_service::run::{{closure}}");
        assert_eq!(pkg, "my_service");
        assert_eq!(func, "run::{{closure}}");

        let frame = Frame::from_symbol("my_service::run::{{closure}}", None, None);
        assert!(frame.is_lambda());
    }

    #[test]
    fn test_split_bare_symbol() {
        let (pkg, func) = split_symbol("main");
        assert_eq!(pkg, "");
        assert_eq!(func, "main");
    }

    #[test]
    fn test_from_symbol_file_name() {
        let frame = Frame::from_symbol(
            "app::handler",
            Some(Path::new("/src/app/handler.rs")),
            Some(42),
        );
        assert_eq!(frame.file, "handler.rs");
        assert_eq!(frame.line, 42);
        assert_eq!(frame.to_string(), "handler.rs:42 app::handler");
    }

    #[test]
    fn test_split_fn_pointer_impl() {
        let symbol = "<fn() -> core::result::Result<(), alloc::string::String> as core::ops::function::FnOnce<()>>::call_once";
        let (pkg, func) = split_symbol(symbol);
        assert_eq!(pkg, "core::ops::function");
        assert_eq!(func, "FnOnce<()>::call_once");

        let frame = Frame::from_symbol(symbol, None, None);
        assert!(!crate::trace::TraceConfig::default().keeps(&frame));
        assert!(!crate::trace::TraceConfig::testing().keeps(&frame));
    }

    #[test]
    fn test_split_generic_self_type() {
        let (pkg, func) = split_symbol("<alloc::vec::Vec<u8> as core::fmt::Debug>::fmt");
        assert_eq!(pkg, "alloc::vec");
        assert_eq!(func, "Vec<u8>::fmt");

        let (pkg, func) =
            split_symbol("<my_app::Cache<alloc::string::String, my_app::Entry> as my_app::Store>::get");
        assert_eq!(pkg, "my_app");
        assert_eq!(func, "Cache<alloc::string::String, my_app::Entry>::get");
    }

    #[test]
    fn test_split_bare_type_param_uses_trait() {
        let (pkg, func) = split_symbol("<F as core::ops::function::FnOnce<A>>::call_once");
        assert_eq!(pkg, "core::ops::function");
        assert_eq!(func, "FnOnce<A>::call_once");
    }

    #[test]
    fn test_here() {
        let frame = Frame::here("tether_error::trace", "here");
        assert_eq!(frame.file, "frame.rs");
        assert_eq!(frame.function, "here");
        assert!(frame.line > 0);
    }
}
