use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Names reserved for runtime bookkeeping start with one of these prefixes.
/// They are never announced on the bus.
const INTERNAL_PREFIXES: [&str; 2] = ["__", "@@"];

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an observable record (or of a computed value's backing field).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    pub(crate) fn next() -> Self { Self(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed)) }

    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// The name of one member of an observable object or array.
///
/// Array indices are stored in their decimal form, so `Member::from(2usize)` and
/// `Member::from("2")` name the same slot.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Member(Rc<str>);

impl Member {
    pub const LENGTH: &'static str = "length";

    /// The synthetic member every array announces shape changes on
    pub fn length() -> Self { Self(Rc::from(Self::LENGTH)) }

    pub fn as_str(&self) -> &str { &self.0 }

    /// Private-prefixed and symbol-like members are bookkeeping, not data
    pub fn is_internal(&self) -> bool { INTERNAL_PREFIXES.iter().any(|prefix| self.0.starts_with(prefix)) }

    pub fn as_index(&self) -> Option<usize> { self.0.parse().ok().filter(|index: &usize| index.to_string() == *self.0) }
}

impl From<&str> for Member {
    fn from(name: &str) -> Self { Self(Rc::from(name)) }
}

impl From<String> for Member {
    fn from(name: String) -> Self { Self(Rc::from(name)) }
}

impl From<&String> for Member {
    fn from(name: &String) -> Self { Self(Rc::from(name.as_str())) }
}

impl From<usize> for Member {
    fn from(index: usize) -> Self { Self(Rc::from(index.to_string())) }
}

impl From<&Member> for Member {
    fn from(member: &Member) -> Self { member.clone() }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", &*self.0) }
}

/// Identifies one observable slot, rendered as `<record>.<member>`.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldKey {
    record: RecordId,
    member: Member,
}

impl FieldKey {
    pub fn new(record: RecordId, member: impl Into<Member>) -> Self { Self { record, member: member.into() } }

    pub fn record(&self) -> RecordId { self.record }

    pub fn member(&self) -> &Member { &self.member }

    pub fn is_internal(&self) -> bool { self.member.is_internal() }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}.{}", self.record, self.member) }
}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "FieldKey({self})") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ids_are_unique() {
        let a = RecordId::next();
        let b = RecordId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_field_key_display() {
        let record = RecordId::next();
        let key = FieldKey::new(record, "name");
        assert_eq!(key.to_string(), format!("{}.name", record.as_u64()));
        assert_eq!(key, FieldKey::new(record, "name".to_string()));
        assert_ne!(key, FieldKey::new(RecordId::next(), "name"));
    }

    #[test]
    fn test_index_members() {
        assert_eq!(Member::from(3usize), Member::from("3"));
        assert_eq!(Member::from("3").as_index(), Some(3));
        assert_eq!(Member::length().as_index(), None);
        assert_eq!(Member::from("01").as_index(), None);
    }

    #[test]
    fn test_internal_members() {
        assert!(Member::from("__owner").is_internal());
        assert!(Member::from("@@iterator").is_internal());
        assert!(!Member::from("_single").is_internal());
        assert!(!Member::from("value").is_internal());
    }
}
