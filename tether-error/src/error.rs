//! The error chain node

use crate::trace::{self, Frame};
use crate::KeyValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One link of a structured error chain.
///
/// Each link carries:
/// - `message`: this link's part of the human-readable text
/// - `codes`: stable classification tokens used for matching
/// - `params`: ordered key/value diagnostics
/// - `stack`: the call stack captured when the link was built
/// - `cause`: the wrapped error, structured or opaque
///
/// Links are built with [`Error::new`] / [`Error::wrap`] and the `with_*`
/// builders, and never change once shared. Wrapping creates a new outer
/// link; the inner one is moved in, not modified.
///
/// # Example
///
/// ```rust
/// use tether_error::Error;
///
/// let root = Error::new("user not found")
///     .with_code("not_found")
///     .with_kv("user_id", 42);
/// let err = Error::wrap(root, "load profile");
///
/// assert_eq!(err.to_string(), "load profile: user not found");
/// assert_eq!(format!("{:#}", err), "load profile: user not found(user_id=42)");
/// assert!(err.is(&Error::new("reference").with_code("not_found")));
/// ```
#[derive(Clone)]
pub struct Error {
    message: String,
    cause: Option<Cause>,
    codes: Vec<String>,
    params: Vec<KeyValue>,
    stack: Vec<Frame>,
}

/// What a link wraps: another link, or an error outside the model.
#[derive(Clone)]
pub enum Cause {
    Chain(Box<Error>),
    Opaque(Arc<anyhow::Error>),
}

impl Cause {
    /// Wrap any standard error as an opaque cause
    pub fn opaque<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Cause::Opaque(Arc::new(anyhow::Error::new(err)))
    }

    /// The structured link, if this cause is one
    pub fn as_chain(&self) -> Option<&Error> {
        match self {
            Cause::Chain(err) => Some(err),
            Cause::Opaque(_) => None,
        }
    }

    /// The cause as a standard error, for `source()` walking
    pub fn as_std(&self) -> &(dyn std::error::Error + 'static) {
        match self {
            Cause::Chain(err) => &**err,
            Cause::Opaque(err) => {
                let inner: &(dyn std::error::Error + Send + Sync + 'static) = (**err).as_ref();
                inner
            }
        }
    }
}

impl From<Error> for Cause {
    fn from(err: Error) -> Self {
        Cause::Chain(Box::new(err))
    }
}

impl From<anyhow::Error> for Cause {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => Cause::Chain(Box::new(err)),
            Err(err) => Cause::Opaque(Arc::new(err)),
        }
    }
}

impl From<std::io::Error> for Cause {
    fn from(err: std::io::Error) -> Self {
        Cause::opaque(err)
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Chain(err) => fmt::Debug::fmt(err, f),
            Cause::Opaque(err) => write!(f, "Opaque({})", err),
        }
    }
}

// =============================================================================
// Constructors
// =============================================================================

impl Error {
    /// Create a root error, capturing the caller's stack.
    #[inline(never)]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            codes: Vec::new(),
            params: Vec::new(),
            stack: trace::capture(0),
        }
    }

    /// Wrap `cause` in a new outer link, capturing the caller's stack.
    ///
    /// The cause's codes and params stay on the cause; they are reachable
    /// through [`Error::codes`] and [`Error::key_values`], not copied.
    ///
    /// `cause` is an [`Error`], an [`anyhow::Error`] or a [`std::io::Error`];
    /// any other error type goes through [`Cause::opaque`].
    #[inline(never)]
    pub fn wrap(cause: impl Into<Cause>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
            codes: Vec::new(),
            params: Vec::new(),
            stack: trace::capture(0),
        }
    }

    /// Create a link without capturing a stack.
    ///
    /// Used when rebuilding an error whose stack came from elsewhere, e.g.
    /// decoded from an RPC status.
    pub fn bare(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            codes: Vec::new(),
            params: Vec::new(),
            stack: Vec::new(),
        }
    }
}

// =============================================================================
// Builders (construction time only)
// =============================================================================

impl Error {
    /// Attach a classification code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.codes.push(code.into());
        self
    }

    /// Attach several codes, in order
    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes.extend(codes.into_iter().map(Into::into));
        self
    }

    /// Attach a key/value parameter
    pub fn with_kv(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.push(KeyValue::new(key, value));
        self
    }

    /// Attach several key/value parameters, in order
    pub fn with_kvs<I>(mut self, kvs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<KeyValue>,
    {
        self.params.extend(kvs.into_iter().map(Into::into));
        self
    }

    /// Set the cause of a link under construction
    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Replace the stack
    pub fn with_stack(mut self, stack: Vec<Frame>) -> Self {
        self.stack = stack;
        self
    }

    /// Append frames to the stack
    pub fn extend_stack<I: IntoIterator<Item = Frame>>(mut self, frames: I) -> Self {
        self.stack.extend(frames);
        self
    }
}

// =============================================================================
// Link getters
// =============================================================================

impl Error {
    /// This link's message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Codes attached to this link only
    pub fn link_codes(&self) -> &[String] {
        &self.codes
    }

    /// Params attached to this link only
    pub fn params(&self) -> &[KeyValue] {
        &self.params
    }

    /// Frames captured for this link, innermost first
    pub fn stack(&self) -> &[Frame] {
        &self.stack
    }

    /// The next link inward, structured or opaque
    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// Walk the structured links, outermost first
    pub fn iter(&self) -> Links<'_> {
        Links { next: Some(self) }
    }

    /// Same as [`crate::is`]
    pub fn is(&self, target: &Error) -> bool {
        crate::matching::is(self, target)
    }
}

/// Iterator over the structured links of a chain
pub struct Links<'a> {
    next: Option<&'a Error>,
}

impl<'a> Iterator for Links<'a> {
    type Item = &'a Error;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.cause.as_ref().and_then(Cause::as_chain);
        Some(current)
    }
}

// =============================================================================
// Chain accessors
// =============================================================================

impl Error {
    /// All codes of the chain, outermost link first
    pub fn codes(&self) -> Vec<&str> {
        self.iter()
            .flat_map(|link| link.codes.iter().map(String::as_str))
            .collect()
    }

    /// All params of the chain, outermost link first
    pub fn key_values(&self) -> Vec<&KeyValue> {
        self.iter().flat_map(|link| link.params.iter()).collect()
    }

    /// Params as a map; the outermost occurrence of a key wins
    pub fn key_value_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for kv in self.key_values() {
            map.entry(kv.key.clone()).or_insert_with(|| kv.value.clone());
        }
        map
    }

    /// The innermost link that carries a stack trace
    pub fn last_stack(&self) -> Option<&Error> {
        self.iter().filter(|link| !link.stack.is_empty()).last()
    }

    /// Rendered stack of the innermost link that carries one
    pub fn last_stack_trace(&self) -> Option<Vec<String>> {
        self.last_stack().map(|link| trace::format_frames(&link.stack))
    }

    /// Parameter-annotated rendering, same as `{:#}`
    pub fn verbose(&self) -> String {
        format!("{:#}", self)
    }

    fn write_chain(&self, f: &mut fmt::Formatter<'_>, verbose: bool) -> fmt::Result {
        let mut link = self;
        let mut first = true;

        loop {
            if !link.message.is_empty() {
                if !first {
                    f.write_str(": ")?;
                }
                f.write_str(&link.message)?;
                first = false;
            }
            // an empty-message link adds its annotation but no separator, so
            // stripping annotations always gives back the plain text
            if verbose && !link.params.is_empty() {
                f.write_str("(")?;
                for (i, kv) in link.params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", kv)?;
                }
                f.write_str(")")?;
            }

            match &link.cause {
                None => return Ok(()),
                Some(Cause::Chain(next)) => link = next,
                Some(Cause::Opaque(err)) => {
                    if !first {
                        f.write_str(": ")?;
                    }
                    return write!(f, "{}", err);
                }
            }
        }
    }
}

// =============================================================================
// Display - plain `a: b: c`, alternate adds `(k=v)` annotations
// =============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_chain(f, f.alternate())
    }
}

// =============================================================================
// Debug - verbose, multi-line format for debugging
// =============================================================================

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:#}", self)?;

        for link in self.iter() {
            writeln!(f)?;
            writeln!(f, "    Message: {}", link.message)?;
            if !link.codes.is_empty() {
                writeln!(f, "    Codes: {}", link.codes.join(", "))?;
            }
            if !link.params.is_empty() {
                writeln!(f, "    Params:")?;
                for kv in &link.params {
                    writeln!(f, "        {}: {}", kv.key, kv.value)?;
                }
            }
            if !link.stack.is_empty() {
                writeln!(f, "    Stack:")?;
                for frame in &link.stack {
                    writeln!(f, "        {}", frame)?;
                }
            }
            if let Some(Cause::Opaque(err)) = &link.cause {
                writeln!(f)?;
                writeln!(f, "    Source: {:?}", err)?;
            }
        }

        Ok(())
    }
}

// =============================================================================
// std::error::Error implementation
// =============================================================================

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(Cause::as_std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Error {
        let root = Error::bare("root").with_kv("p1", "v1").with_kv("p2", "v2");
        let inner = Error::bare("inner").with_kv("w", "w1").with_cause(root);
        Error::bare("outer").with_cause(inner)
    }

    #[test]
    fn test_error_creation() {
        let err = Error::new("user not found").with_code("not_found");
        assert_eq!(err.message(), "user not found");
        assert_eq!(err.link_codes(), &["not_found".to_string()]);
        assert!(err.cause().is_none());
    }

    #[test]
    fn test_plain_format() {
        let err = chain();
        assert_eq!(err.to_string(), "outer: inner: root");
        assert_eq!(format!("{}", err), "outer: inner: root");
    }

    #[test]
    fn test_verbose_format() {
        let err = chain();
        assert_eq!(format!("{:#}", err), "outer: inner(w=w1): root(p1=v1, p2=v2)");
        assert_eq!(err.verbose(), "outer: inner(w=w1): root(p1=v1, p2=v2)");
    }

    #[test]
    fn test_wrapped_opaque_format() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no rows in result set");
        let err = Error::wrap(io, "wrap sql error").with_kv("w", "w1");
        assert_eq!(err.to_string(), "wrap sql error: no rows in result set");
        assert_eq!(err.verbose(), "wrap sql error(w=w1): no rows in result set");
    }

    #[test]
    fn test_empty_message() {
        let err = Error::new("");
        assert_eq!(err.to_string(), "");

        let io = std::io::Error::new(std::io::ErrorKind::Other, "transport says no");
        let err = Error::bare("").with_code("x").with_cause(io);
        assert_eq!(err.to_string(), "transport says no");

        let err = Error::bare("").with_kv("code", "Unknown").with_cause(Error::bare("inner"));
        assert_eq!(err.verbose(), "(code=Unknown)inner");
        assert_eq!(err.to_string(), "inner");

        let err = Error::wrap(err, "outer");
        assert_eq!(err.verbose(), "outer(code=Unknown): inner");
        assert_eq!(err.verbose().replacen("(code=Unknown)", "", 1), err.to_string());
    }

    #[test]
    fn test_plain_is_verbose_without_annotations() {
        let err = Error::wrap(chain(), "top").with_kv("n", 3);
        let mut stripped = err.verbose();
        for annotation in ["(n=3)", "(w=w1)", "(p1=v1, p2=v2)"] {
            stripped = stripped.replacen(annotation, "", 1);
        }
        assert_eq!(stripped, err.to_string());
    }

    #[test]
    fn test_message_with_separator() {
        let err = Error::wrap(Error::new("base: error msg"), "inner");
        assert_eq!(err.to_string(), "inner: base: error msg");
    }

    #[test]
    fn test_chain_codes_and_params() {
        let root = Error::new("root").with_code("a").with_kv("k", "inner");
        let mid = Error::wrap(root, "mid").with_code("b");
        let err = Error::wrap(mid, "top").with_kv("k", "outer").with_kv("x", 1);

        assert_eq!(err.codes(), vec!["b", "a"]);
        let keys: Vec<&str> = err.key_values().iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["k", "x", "k"]);

        let map = err.key_value_map();
        assert_eq!(map["k"], "outer");
        assert_eq!(map["x"], "1");
    }

    #[test]
    fn test_wrap_does_not_copy() {
        let root = Error::new("root").with_code("a");
        let err = Error::wrap(root, "top");
        assert!(err.link_codes().is_empty());
        assert!(err.params().is_empty());
        assert_eq!(err.iter().count(), 2);
    }

    #[test]
    fn test_anyhow_cause_is_rediscovered() {
        let inner = Error::new("inner").with_code("c");
        let err = Error::wrap(anyhow::Error::new(inner), "outer");
        assert!(err.cause().and_then(Cause::as_chain).is_some());
        assert_eq!(err.codes(), vec!["c"]);
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::wrap(Error::wrap(io, "inner"), "outer");
        let inner = err.source().unwrap();
        assert_eq!(inner.to_string(), "inner: missing");
        assert_eq!(inner.source().unwrap().to_string(), "missing");
    }

    #[test]
    fn test_last_stack() {
        let root = Error::new("root");
        let err = Error::bare("outer").with_cause(root);
        assert_eq!(err.last_stack().unwrap().message(), "root");

        let err = Error::bare("alone");
        assert!(err.last_stack().is_none());
        assert!(err.last_stack_trace().is_none());
    }

    #[test]
    fn test_debug_lists_links() {
        let err = Error::wrap(Error::bare("root").with_code("c1"), "outer");
        let debug = format!("{:?}", err);
        assert!(debug.contains("Message: outer"));
        assert!(debug.contains("Codes: c1"));
    }

    #[test]
    fn send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
