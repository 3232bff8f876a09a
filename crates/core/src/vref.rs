//! Vat-visible reference identifiers.
//!
//! A [`Vref`] names an object, promise, or device node across the vat/kernel
//! boundary. It carries three coordinates beyond its numeric id: the kind of
//! entity it names, which side allocated it, and (for vat-allocated objects
//! only) whether the entity's canonical state lives in the virtual-object
//! store. The kernel treats the token as opaque beyond those coordinates.
//!
//! The text encoding is `o+7`, `o+v42`, `o-10`, `p+5`, `p-3`, `d-4`: a kind
//! letter, an allocator sign (`+` this vat, `-` the kernel), an optional `v`
//! marker, and a decimal id. The encoding of a given reference never changes
//! across the vat's lifetime.

use crate::error::VatError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// What kind of entity a reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefKind {
    /// A pass-by-capability object (remotable, presence, or virtual object).
    Object,
    /// A promise for a not-yet-determined value.
    Promise,
    /// A device node reachable through synchronous kernel calls.
    Device,
}

impl RefKind {
    fn letter(self) -> char {
        match self {
            RefKind::Object => 'o',
            RefKind::Promise => 'p',
            RefKind::Device => 'd',
        }
    }
}

/// Which side of the boundary allocated a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Allocator {
    /// Allocated by this vat (`+` sign).
    Vat,
    /// Allocated by the kernel (`-` sign).
    Kernel,
}

/// A vat-visible reference identifier.
///
/// The coordinates of a `Vref` are fixed at allocation time and never change;
/// ids are monotonic within a vat lifetime and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vref {
    kind: RefKind,
    allocator: Allocator,
    virt: bool,
    id: u64,
}

impl Vref {
    /// The root object of a vat always exports as `o+0`.
    pub const ROOT_ID: u64 = 0;

    /// Builds an ordinary vat-allocated object reference (`o+id`).
    pub fn object_export(id: u64) -> Self {
        Self {
            kind: RefKind::Object,
            allocator: Allocator::Vat,
            virt: false,
            id,
        }
    }

    /// Builds a virtual vat-allocated object reference (`o+vid`).
    pub fn virtual_export(id: u64) -> Self {
        Self {
            kind: RefKind::Object,
            allocator: Allocator::Vat,
            virt: true,
            id,
        }
    }

    /// Builds a kernel-allocated object reference (`o-id`).
    pub fn object_import(id: u64) -> Self {
        Self {
            kind: RefKind::Object,
            allocator: Allocator::Kernel,
            virt: false,
            id,
        }
    }

    /// Builds a vat-allocated promise reference (`p+id`).
    pub fn promise_export(id: u64) -> Self {
        Self {
            kind: RefKind::Promise,
            allocator: Allocator::Vat,
            virt: false,
            id,
        }
    }

    /// Builds a kernel-allocated promise reference (`p-id`).
    pub fn promise_import(id: u64) -> Self {
        Self {
            kind: RefKind::Promise,
            allocator: Allocator::Kernel,
            virt: false,
            id,
        }
    }

    /// Builds a device-node reference (`d-id`); device nodes are always
    /// kernel-allocated from the vat's point of view.
    pub fn device(id: u64) -> Self {
        Self {
            kind: RefKind::Device,
            allocator: Allocator::Kernel,
            virt: false,
            id,
        }
    }

    /// The fixed reference of the vat's root object.
    pub fn root() -> Self {
        Self::object_export(Self::ROOT_ID)
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    pub fn allocator(&self) -> Allocator {
        self.allocator
    }

    /// True for vat-allocated objects whose state is paged out to the
    /// virtual-object store.
    pub fn is_virtual(&self) -> bool {
        self.virt
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_object(&self) -> bool {
        self.kind == RefKind::Object
    }

    pub fn is_promise(&self) -> bool {
        self.kind == RefKind::Promise
    }

    pub fn is_device(&self) -> bool {
        self.kind == RefKind::Device
    }

    /// True when this vat allocated the reference.
    pub fn is_export(&self) -> bool {
        self.allocator == Allocator::Vat
    }

    /// True when the kernel allocated the reference.
    pub fn is_import(&self) -> bool {
        self.allocator == Allocator::Kernel
    }

    pub fn is_root(&self) -> bool {
        *self == Self::root()
    }
}

impl fmt::Display for Vref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.allocator {
            Allocator::Vat => '+',
            Allocator::Kernel => '-',
        };
        if self.virt {
            write!(f, "{}{}v{}", self.kind.letter(), sign, self.id)
        } else {
            write!(f, "{}{}{}", self.kind.letter(), sign, self.id)
        }
    }
}

impl FromStr for Vref {
    type Err = VatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VatError::MalformedVref {
            token: s.to_string(),
        };

        let mut chars = s.chars();
        let kind = match chars.next().ok_or_else(malformed)? {
            'o' => RefKind::Object,
            'p' => RefKind::Promise,
            'd' => RefKind::Device,
            _ => return Err(malformed()),
        };
        let allocator = match chars.next().ok_or_else(malformed)? {
            '+' => Allocator::Vat,
            '-' => Allocator::Kernel,
            _ => return Err(malformed()),
        };

        let rest = chars.as_str();
        let (virt, digits) = match rest.strip_prefix('v') {
            Some(digits) => (true, digits),
            None => (false, rest),
        };
        if virt && (kind != RefKind::Object || allocator != Allocator::Vat) {
            return Err(malformed());
        }
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let id: u64 = digits.parse().map_err(|_| malformed())?;

        Ok(Self {
            kind,
            allocator,
            virt,
            id,
        })
    }
}

impl Serialize for Vref {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Vref {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Sorts a list of vrefs lexicographically by their text encoding and drops
/// duplicates. This is the order GC syscalls carry their operands in.
pub fn sort_vrefs(vrefs: &mut Vec<Vref>) {
    vrefs.sort_by_key(|v| v.to_string());
    vrefs.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_encoding() {
        assert_eq!(Vref::object_export(7).to_string(), "o+7");
        assert_eq!(Vref::virtual_export(42).to_string(), "o+v42");
        assert_eq!(Vref::object_import(10).to_string(), "o-10");
        assert_eq!(Vref::promise_export(5).to_string(), "p+5");
        assert_eq!(Vref::promise_import(3).to_string(), "p-3");
        assert_eq!(Vref::device(4).to_string(), "d-4");
    }

    #[test]
    fn parse_round_trip() {
        for text in ["o+0", "o+v42", "o-10", "p+5", "p-3", "d-4"] {
            let vref: Vref = text.parse().unwrap();
            assert_eq!(vref.to_string(), text);
        }
    }

    #[test]
    fn rejects_malformed_tokens() {
        for text in ["", "x+1", "o1", "o+", "o+v", "o+1v", "p+v3", "d-v4", "o+1.5", "o*3"] {
            assert!(text.parse::<Vref>().is_err(), "accepted {text:?}");
        }
    }

    #[test]
    fn root_is_object_zero() {
        let root = Vref::root();
        assert_eq!(root.to_string(), "o+0");
        assert!(root.is_root());
        assert!(root.is_export());
        assert!(!root.is_virtual());
    }

    #[test]
    fn coordinates_are_observable() {
        let vref = Vref::virtual_export(9);
        assert_eq!(vref.kind(), RefKind::Object);
        assert_eq!(vref.allocator(), Allocator::Vat);
        assert!(vref.is_virtual());
        assert_eq!(vref.id(), 9);
    }

    #[test]
    fn sort_is_lexicographic_and_dedups() {
        let mut vrefs = vec![
            Vref::object_import(9),
            Vref::object_import(10),
            Vref::object_import(10),
            Vref::object_export(2),
        ];
        sort_vrefs(&mut vrefs);
        let texts: Vec<String> = vrefs.iter().map(|v| v.to_string()).collect();
        assert_eq!(texts, ["o+2", "o-10", "o-9"]);
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&Vref::promise_export(5)).unwrap();
        assert_eq!(json, "\"p+5\"");
        let back: Vref = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Vref::promise_export(5));
    }
}
