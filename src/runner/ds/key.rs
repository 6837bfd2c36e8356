//! Case-insensitive identifiers.
//!
//! Every scope in the runtime is keyed by [`Key`]. The upper-cased form and
//! the hash are computed once, when the key is built, because keys are the
//! hash key of every scope lookup.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Numeric keys below this bound are preallocated.
const CACHED_INT_KEYS: i64 = 1000;

struct KeyData {
    name: String,
    name_no_case: String,
    hash: u64,
    int_value: Option<i64>,
}

#[derive(Clone)]
pub struct Key(Arc<KeyData>);

impl Key {
    fn build(name: String, int_value: Option<i64>) -> Self {
        let name_no_case = name.to_uppercase();
        let mut hasher = DefaultHasher::new();
        name_no_case.hash(&mut hasher);
        Key(Arc::new(KeyData {
            name,
            name_no_case,
            hash: hasher.finish(),
            int_value,
        }))
    }

    /// Builds a key from a name. Names of one to three ASCII digits become
    /// numeric keys, so `"01"` and `"1"` address the same slot.
    pub fn of(name: impl Into<String>) -> Self {
        let name = name.into();
        let bytes = name.as_bytes();
        if !bytes.is_empty() && bytes.len() <= 3 && bytes.iter().all(u8::is_ascii_digit) {
            let n = bytes
                .iter()
                .fold(0i64, |acc, b| acc * 10 + i64::from(b - b'0'));
            return Key::of_int(n);
        }
        Key::build(name, None)
    }

    pub fn of_int(n: i64) -> Self {
        if (0..CACHED_INT_KEYS).contains(&n) {
            return INT_KEYS[n as usize].clone();
        }
        Key::build(n.to_string(), Some(n))
    }

    /// Integral floating values collapse onto the numeric key of the same int.
    pub fn of_f64(n: f64) -> Self {
        if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            Key::of_int(n as i64)
        } else {
            Key::build(n.to_string(), None)
        }
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn name_no_case(&self) -> &str {
        &self.0.name_no_case
    }

    pub fn int_value(&self) -> Option<i64> {
        self.0.int_value
    }

    pub fn is_numeric(&self) -> bool {
        self.0.int_value.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.name.is_empty()
    }

    /// Case-sensitive comparison, for the rare callers that must tell
    /// `foo` from `FOO`.
    pub fn equals_with_case(&self, other: &Key) -> bool {
        self.0.name == other.0.name
    }

    pub fn compare_with_case(&self, other: &Key) -> Ordering {
        self.0.name.cmp(&other.0.name)
    }

    pub fn hash_code(&self) -> u64 {
        self.0.hash
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.hash == other.0.hash && self.0.name_no_case == other.0.name_no_case)
    }
}
impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.name_no_case.cmp(&other.0.name_no_case)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0.int_value {
            Some(n) => write!(f, "Key({})", n),
            None => write!(f, "Key({:?})", self.0.name),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::of(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::of(name)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::of_int(n)
    }
}

lazy_static! {
    static ref INT_KEYS: Vec<Key> = (0..CACHED_INT_KEYS)
        .map(|n| Key::build(n.to_string(), Some(n)))
        .collect();

    /* Scope names */
    pub static ref VARIABLES: Key = Key::of("variables");
    pub static ref LOCAL: Key = Key::of("local");
    pub static ref ARGUMENTS: Key = Key::of("arguments");
    pub static ref THIS: Key = Key::of("this");
    pub static ref STATIC: Key = Key::of("static");
    pub static ref REQUEST: Key = Key::of("request");
    pub static ref SESSION: Key = Key::of("session");
    pub static ref APPLICATION: Key = Key::of("application");
    pub static ref SERVER: Key = Key::of("server");

    /* Lifecycle and seeded scope keys */
    pub static ref ON_APPLICATION_START: Key = Key::of("onApplicationStart");
    pub static ref ON_APPLICATION_END: Key = Key::of("onApplicationEnd");
    pub static ref ON_SESSION_START: Key = Key::of("onSessionStart");
    pub static ref ON_SESSION_END: Key = Key::of("onSessionEnd");
    pub static ref APPLICATION_NAME: Key = Key::of("applicationName");
    pub static ref JSESSIONID: Key = Key::of("jsessionid");
    pub static ref SESSIONID: Key = Key::of("sessionid");
    pub static ref TIME_CREATED: Key = Key::of("timeCreated");
    pub static ref LAST_VISIT: Key = Key::of("lastVisit");
    pub static ref COLDFUSION: Key = Key::of("coldfusion");
    pub static ref OS: Key = Key::of("os");
    pub static ref SEPARATOR: Key = Key::of("separator");
    pub static ref RUNTIME: Key = Key::of("runtime");
}

/// Scope names that are reachable by qualified access.
pub fn is_scope_name(key: &Key) -> bool {
    [
        &*VARIABLES,
        &*LOCAL,
        &*ARGUMENTS,
        &*THIS,
        &*STATIC,
        &*REQUEST,
        &*SESSION,
        &*APPLICATION,
        &*SERVER,
    ]
    .iter()
    .any(|k| *k == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digit_strings_are_numeric() {
        assert_eq!(Key::of("7").int_value(), Some(7));
        assert_eq!(Key::of("042").int_value(), Some(42));
        assert_eq!(Key::of("1234").int_value(), None);
        assert_eq!(Key::of("").int_value(), None);
    }

    #[test]
    fn test_cached_int_keys_share_storage() {
        let a = Key::of_int(12);
        let b = Key::of("12");
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn test_scope_names() {
        assert!(is_scope_name(&Key::of("VARIABLES")));
        assert!(is_scope_name(&Key::of("Session")));
        assert!(!is_scope_name(&Key::of("foo")));
    }
}
