//! Resource value objects and the keyed resource set a node advertises

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result, Role};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Byte size value object with compile-time unit safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ByteSize(u64); // bytes

impl ByteSize {
    /// Create from bytes
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from kilobytes
    #[must_use]
    pub const fn from_kb(kb: u64) -> Self {
        Self(kb.saturating_mul(KB))
    }

    /// Create from megabytes
    #[must_use]
    pub const fn from_mb(mb: u64) -> Self {
        Self(mb.saturating_mul(MB))
    }

    /// Create from gigabytes
    #[must_use]
    pub const fn from_gb(gb: u64) -> Self {
        Self(gb.saturating_mul(GB))
    }

    /// Get value in bytes
    #[must_use]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Whole megabytes, rounding down
    #[must_use]
    pub const fn whole_mb(self) -> u64 {
        self.0 / MB
    }

    /// Drop any sub-megabyte remainder
    #[must_use]
    pub const fn truncate_to_mb(self) -> Self {
        Self::from_mb(self.whole_mb())
    }

    /// Get value in gigabytes
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_gb(self) -> f64 {
        self.0 as f64 / GB as f64
    }
}

impl Add for ByteSize {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for ByteSize {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for ByteSize {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= GB {
            write!(f, "{:.2} GB", self.as_gb())
        } else if self.0 >= MB {
            write!(f, "{:.2} MB", self.0 as f64 / MB as f64)
        } else if self.0 >= KB {
            write!(f, "{:.2} KB", self.0 as f64 / KB as f64)
        } else {
            write!(f, "{} bytes", self.0)
        }
    }
}

/// The resource dimensions a node advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Logical CPUs, as a real number
    Cpus,
    /// Main memory
    Mem,
    /// Disk space of the work directory's filesystem
    Disk,
    /// Network port ranges
    Ports,
}

impl Dimension {
    /// Every dimension, in advertising order
    pub const ALL: [Self; 4] = [Self::Cpus, Self::Mem, Self::Disk, Self::Ports];

    /// Name as used in override strings
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpus => "cpus",
            Self::Mem => "mem",
            Self::Disk => "disk",
            Self::Ports => "ports",
        }
    }

    /// Whether `quantity` has the shape this dimension stores
    #[must_use]
    pub const fn accepts(self, quantity: &Quantity) -> bool {
        matches!(
            (self, quantity),
            (Self::Cpus, Quantity::Scalar(_))
                | (Self::Mem | Self::Disk, Quantity::Bytes(_))
                | (Self::Ports, Quantity::Ranges(_))
        )
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpus" => Ok(Self::Cpus),
            "mem" => Ok(Self::Mem),
            "disk" => Ok(Self::Disk),
            "ports" => Ok(Self::Ports),
            other => Err(Error::parse(other, "unknown resource name")),
        }
    }
}

/// Inclusive port interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPortRange")]
pub struct PortRange {
    /// First port in the interval
    pub begin: u16,
    /// Last port in the interval
    pub end: u16,
}

#[derive(Deserialize)]
struct RawPortRange {
    begin: u16,
    end: u16,
}

impl TryFrom<RawPortRange> for PortRange {
    type Error = Error;

    fn try_from(raw: RawPortRange) -> Result<Self> {
        Self::new(raw.begin, raw.end)
    }
}

impl PortRange {
    /// Create a new interval
    ///
    /// # Errors
    /// Returns error if `begin > end`
    pub fn new(begin: u16, end: u16) -> Result<Self> {
        if begin > end {
            return Err(Error::InvalidConfig {
                message: format!("Port range {begin}-{end} is inverted"),
            });
        }
        Ok(Self { begin, end })
    }

    /// Number of ports in the interval
    #[must_use]
    pub fn port_count(self) -> u32 {
        u32::from(self.end) - u32::from(self.begin) + 1
    }
}

/// Sorted set of disjoint port intervals
///
/// Deserialized input is normalized the same way [`Ranges::from_ranges`]
/// normalizes, and must name at least one interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<PortRange>")]
pub struct Ranges(Vec<PortRange>);

impl TryFrom<Vec<PortRange>> for Ranges {
    type Error = Error;

    fn try_from(ranges: Vec<PortRange>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(Error::InvalidConfig {
                message: "port ranges must name at least one interval".to_string(),
            });
        }
        Ok(Self::from_ranges(ranges))
    }
}

impl Ranges {
    /// Build from arbitrary intervals, sorting and coalescing overlaps and neighbours
    #[must_use]
    pub fn from_ranges(ranges: impl IntoIterator<Item = PortRange>) -> Self {
        let mut ranges: Vec<PortRange> = ranges.into_iter().collect();
        ranges.sort_unstable();

        let mut merged: Vec<PortRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.begin <= last.end.saturating_add(1) => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }

        Self(merged)
    }

    /// Single interval
    #[must_use]
    pub fn single(range: PortRange) -> Self {
        Self(vec![range])
    }

    /// The disjoint intervals, ascending
    #[must_use]
    pub fn intervals(&self) -> &[PortRange] {
        &self.0
    }

    /// Total number of ports covered
    #[must_use]
    pub fn port_count(&self) -> u32 {
        self.0.iter().map(|r| r.port_count()).sum()
    }

    /// Set union
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::from_ranges(self.0.iter().chain(other.0.iter()).copied())
    }

    /// Whether there are no intervals
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Ranges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, range) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}-{}", range.begin, range.end)?;
        }
        f.write_str("]")
    }
}

/// A typed resource amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Quantity {
    /// Real number (cpus)
    Scalar(f64),
    /// Byte size, held in whole megabytes once inside a [`ResourceSet`]
    Bytes(ByteSize),
    /// Integer interval set (ports)
    Ranges(Ranges),
}

impl Quantity {
    fn normalized(self) -> Self {
        match self {
            Self::Bytes(size) => Self::Bytes(size.truncate_to_mb()),
            other => other,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{value}"),
            Self::Bytes(size) => write!(f, "{}", size.whole_mb()),
            Self::Ranges(ranges) => write!(f, "{ranges}"),
        }
    }
}

/// One (name, role) -> quantity entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Resource dimension
    pub name: Dimension,
    /// Role the entry is advertised under
    pub role: Role,
    /// Amount
    pub value: Quantity,
}

/// Immutable mapping from (name, role) to a typed quantity
///
/// At most one entry exists per key. [`ResourceSet::merge`] refuses to
/// combine sets sharing a key; [`ResourceSet::overlay`] lets the right-hand
/// side win instead.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "Vec<ResourceEntry>", try_from = "Vec<ResourceEntry>")]
pub struct ResourceSet {
    entries: BTreeMap<(Dimension, Role), Quantity>,
}

impl ResourceSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-entry set, with byte sizes normalized to whole megabytes
    ///
    /// # Errors
    /// Returns error if the quantity's shape does not fit the dimension
    pub fn single(name: Dimension, role: Role, value: Quantity) -> Result<Self> {
        let mut set = Self::new();
        set.insert(name, role, value)?;
        Ok(set)
    }

    /// Insert a new key, refusing duplicates and mismatched shapes
    pub(crate) fn insert(&mut self, name: Dimension, role: Role, value: Quantity) -> Result<()> {
        if !name.accepts(&value) {
            return Err(Error::InvalidConfig {
                message: format!("'{value}' is not a valid amount of {name}"),
            });
        }

        if self.entries.contains_key(&(name, role.clone())) {
            return Err(Error::DuplicateResource {
                name: name.to_string(),
                role: role.to_string(),
            });
        }

        self.entries.insert((name, role), value.normalized());
        Ok(())
    }

    /// Additive merge; fails if any (name, role) key appears on both sides
    ///
    /// # Errors
    /// Returns [`Error::DuplicateResource`] naming the first shared key
    pub fn merge(mut self, other: Self) -> Result<Self> {
        if let Some((name, role)) = other.entries.keys().find(|k| self.entries.contains_key(*k)) {
            return Err(Error::DuplicateResource {
                name: name.to_string(),
                role: role.to_string(),
            });
        }

        self.entries.extend(other.entries);
        Ok(self)
    }

    /// Override merge; entries of `other` replace ours on shared keys
    #[must_use]
    pub fn overlay(mut self, other: Self) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in (name, role) order
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &Role, &Quantity)> {
        self.entries.iter().map(|((name, role), q)| (*name, role, q))
    }

    /// Look up one key
    #[must_use]
    pub fn get(&self, name: Dimension, role: &Role) -> Option<&Quantity> {
        self.entries.get(&(name, role.clone()))
    }

    /// Whether any role holds an entry for `name`
    #[must_use]
    pub fn has_dimension(&self, name: Dimension) -> bool {
        self.entries.keys().any(|(n, _)| *n == name)
    }

    /// Number of roles holding an entry for `name`
    #[must_use]
    pub fn count(&self, name: Dimension) -> usize {
        self.entries.keys().filter(|(n, _)| *n == name).count()
    }

    fn values(&self, name: Dimension) -> impl Iterator<Item = &Quantity> {
        self.entries
            .iter()
            .filter(move |((n, _), _)| *n == name)
            .map(|(_, q)| q)
    }

    /// Total cpus across roles
    #[must_use]
    pub fn cpus(&self) -> Option<f64> {
        self.values(Dimension::Cpus)
            .filter_map(|q| match q {
                Quantity::Scalar(v) => Some(*v),
                _ => None,
            })
            .reduce(|a, b| a + b)
    }

    /// Total memory across roles
    #[must_use]
    pub fn mem(&self) -> Option<ByteSize> {
        self.bytes(Dimension::Mem)
    }

    /// Total disk across roles
    #[must_use]
    pub fn disk(&self) -> Option<ByteSize> {
        self.bytes(Dimension::Disk)
    }

    fn bytes(&self, name: Dimension) -> Option<ByteSize> {
        self.values(name)
            .filter_map(|q| match q {
                Quantity::Bytes(b) => Some(*b),
                _ => None,
            })
            .reduce(|a, b| a + b)
    }

    /// Union of port ranges across roles
    #[must_use]
    pub fn ports(&self) -> Option<Ranges> {
        self.values(Dimension::Ports)
            .filter_map(|q| match q {
                Quantity::Ranges(r) => Some(r.clone()),
                _ => None,
            })
            .reduce(|a, b| a.union(&b))
    }
}

impl fmt::Display for ResourceSet {
    /// Renders in override syntax, e.g. `cpus(*):2; mem(*):7168`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, role, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{name}({role}):{value}")?;
        }
        Ok(())
    }
}

impl From<ResourceSet> for Vec<ResourceEntry> {
    fn from(set: ResourceSet) -> Self {
        set.entries
            .into_iter()
            .map(|((name, role), value)| ResourceEntry { name, role, value })
            .collect()
    }
}

impl TryFrom<Vec<ResourceEntry>> for ResourceSet {
    type Error = Error;

    fn try_from(entries: Vec<ResourceEntry>) -> Result<Self> {
        let mut set = Self::new();
        for entry in entries {
            set.insert(entry.name, entry.role, entry.value)?;
        }
        Ok(set)
    }
}

/// Per-task resource usage snapshot reported by isolation backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    /// Allocated cpus, if the task has a cpus allocation
    pub cpus_limit: Option<f64>,

    /// Allocated memory, if the task has a mem allocation
    pub mem_limit: Option<ByteSize>,

    /// Total CPU time used
    #[serde(with = "duration_serde")]
    pub cpu_usage: Duration,

    /// Time spent throttled (hit CPU limit)
    #[serde(with = "duration_serde")]
    pub cpu_throttled: Duration,

    /// Current memory usage
    pub memory_current: ByteSize,
}

// Duration as whole milliseconds on the wire
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> Role {
        Role::default()
    }

    #[test]
    fn byte_size_conversions() {
        let size = ByteSize::from_gb(8) - ByteSize::from_gb(1);
        assert_eq!(size.whole_mb(), 7168);
        assert_eq!(ByteSize::from_bytes(MB + 1).truncate_to_mb(), ByteSize::from_mb(1));
        assert_eq!(ByteSize::from_mb(1) - ByteSize::from_gb(1), ByteSize::from_bytes(0));
    }

    #[test]
    fn byte_size_display() {
        assert_eq!(format!("{}", ByteSize::from_gb(2)), "2.00 GB");
        assert_eq!(format!("{}", ByteSize::from_mb(512)), "512.00 MB");
        assert_eq!(format!("{}", ByteSize::from_bytes(100)), "100 bytes");
    }

    #[test]
    fn ranges_coalesce() {
        let ranges = Ranges::from_ranges([
            PortRange::new(33000, 34000).unwrap(),
            PortRange::new(31000, 32000).unwrap(),
            PortRange::new(32001, 32500).unwrap(),
        ]);
        assert_eq!(ranges.to_string(), "[31000-32500, 33000-34000]");
        assert_eq!(ranges.port_count(), 1501 + 1001);
    }

    #[test]
    fn inverted_port_range_rejected() {
        assert!(PortRange::new(10, 5).is_err());
    }

    #[test]
    fn full_port_space_counts_without_overflow() {
        let ranges = Ranges::single(PortRange::new(0, u16::MAX).unwrap());
        assert_eq!(ranges.port_count(), 65536);
    }

    #[test]
    fn deserialized_ranges_are_validated() {
        let inverted = r#"[{"begin":32000,"end":31000}]"#;
        assert!(serde_json::from_str::<Ranges>(inverted).is_err());
        assert!(serde_json::from_str::<PortRange>(r#"{"begin":32000,"end":31000}"#).is_err());
        assert!(serde_json::from_str::<PortRange>(r#"{"begin":0,"end":70000}"#).is_err());
        assert!(serde_json::from_str::<Ranges>("[]").is_err());

        let ranges: Ranges =
            serde_json::from_str(r#"[{"begin":33000,"end":34000},{"begin":31000,"end":33000}]"#).unwrap();
        assert_eq!(ranges.to_string(), "[31000-34000]");
    }

    #[test]
    fn single_normalizes_bytes() {
        let set = ResourceSet::single(
            Dimension::Mem,
            star(),
            Quantity::Bytes(ByteSize::from_bytes(3 * MB + 12345)),
        )
        .unwrap();
        assert_eq!(set.mem(), Some(ByteSize::from_mb(3)));
    }

    #[test]
    fn single_rejects_wrong_shape() {
        assert!(ResourceSet::single(Dimension::Cpus, star(), Quantity::Bytes(ByteSize::from_mb(1))).is_err());
        assert!(ResourceSet::single(Dimension::Ports, star(), Quantity::Scalar(1.0)).is_err());
    }

    #[test]
    fn merge_rejects_duplicate_key() {
        let a = ResourceSet::single(Dimension::Cpus, star(), Quantity::Scalar(1.0)).unwrap();
        let b = ResourceSet::single(Dimension::Cpus, star(), Quantity::Scalar(2.0)).unwrap();

        let err = a.merge(b).unwrap_err();
        assert!(matches!(err, Error::DuplicateResource { ref name, .. } if name == "cpus"));
    }

    #[test]
    fn merge_keeps_distinct_roles() {
        let a = ResourceSet::single(Dimension::Cpus, star(), Quantity::Scalar(1.0)).unwrap();
        let b = ResourceSet::single(Dimension::Cpus, Role::new("prod").unwrap(), Quantity::Scalar(2.5))
            .unwrap();

        let merged = a.merge(b).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.count(Dimension::Cpus), 2);
        assert_eq!(merged.cpus(), Some(3.5));
    }

    #[test]
    fn overlay_replaces_without_duplicating() {
        let base = ResourceSet::single(Dimension::Cpus, star(), Quantity::Scalar(1.0)).unwrap();
        let over = ResourceSet::single(Dimension::Cpus, star(), Quantity::Scalar(4.0)).unwrap();

        let result = base.overlay(over);
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(Dimension::Cpus, &star()), Some(&Quantity::Scalar(4.0)));
    }

    #[test]
    fn display_uses_override_syntax() {
        let set = ResourceSet::single(Dimension::Cpus, star(), Quantity::Scalar(2.0))
            .unwrap()
            .merge(
                ResourceSet::single(Dimension::Mem, star(), Quantity::Bytes(ByteSize::from_mb(7168)))
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(set.to_string(), "cpus(*):2; mem(*):7168");
    }

    #[test]
    fn resource_set_serde() {
        let set = ResourceSet::single(
            Dimension::Ports,
            star(),
            Quantity::Ranges(Ranges::single(PortRange::new(31000, 32000).unwrap())),
        )
        .unwrap();

        let json = serde_json::to_string(&set).unwrap();
        let back: ResourceSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }

    #[test]
    fn resource_stats_serde() {
        let stats = ResourceStats {
            cpus_limit: Some(1.5),
            cpu_usage: Duration::from_secs(10),
            memory_current: ByteSize::from_mb(100),
            ..Default::default()
        };

        let json = serde_json::to_string(&stats).unwrap();
        let deserialized: ResourceStats = serde_json::from_str(&json).unwrap();
        assert_eq!(stats, deserialized);
    }
}
