//! Parser for operator-supplied resource overrides
//!
//! Syntax: `name[(role)]:value` entries joined by `;`, for example
//! `cpus:2; mem(prod):4096; ports:[31000-32000, 40000-40100]`.
//! `mem` and `disk` are given in whole megabytes; port bounds must fit in 16 bits.

use std::str::FromStr;

use crate::resources::ResourceSet;
use crate::{ByteSize, Dimension, Error, PortRange, Quantity, Ranges, Result, Role};

/// Parse `raw` into a resource set, labelling role-less entries with `default_role`
///
/// Empty or whitespace-only input yields an empty set.
///
/// # Errors
/// Returns [`Error::ConfigParse`] on unknown names, malformed values or roles,
/// and on a (name, role) pair given twice.
pub fn parse(raw: &str, default_role: &Role) -> Result<ResourceSet> {
    let mut set = ResourceSet::new();

    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (key, value) = entry
            .split_once(':')
            .ok_or_else(|| Error::parse(entry, "expected 'name:value'"))?;

        let (name, role) = parse_key(key.trim(), default_role)?;
        let quantity = parse_value(name, value.trim())
            .map_err(|message| Error::parse(entry, message))?;

        set.insert(name, role, quantity).map_err(|e| match e {
            Error::DuplicateResource { .. } => Error::parse(entry, "resource given more than once"),
            other => Error::parse(entry, other.to_string()),
        })?;
    }

    Ok(set)
}

fn parse_key(key: &str, default_role: &Role) -> Result<(Dimension, Role)> {
    match key.split_once('(') {
        Some((name, rest)) => {
            let role = rest
                .strip_suffix(')')
                .ok_or_else(|| Error::parse(key, "unterminated role"))?;
            let role = Role::new(role.trim()).map_err(|e| Error::parse(key, e.to_string()))?;
            Ok((name.trim().parse()?, role))
        }
        None => Ok((key.parse()?, default_role.clone())),
    }
}

fn parse_value(name: Dimension, value: &str) -> std::result::Result<Quantity, String> {
    match name {
        Dimension::Cpus => parse_amount(value).map(Quantity::Scalar),
        Dimension::Mem | Dimension::Disk => {
            let megabytes = parse_amount(value)?;
            if megabytes.fract() != 0.0 {
                return Err(format!("'{value}' must be a whole number of megabytes"));
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Ok(Quantity::Bytes(ByteSize::from_mb(megabytes as u64)))
        }
        Dimension::Ports => value
            .parse::<Ranges>()
            .map(Quantity::Ranges)
            .map_err(|e| e.to_string()),
    }
}

fn parse_amount(value: &str) -> std::result::Result<f64, String> {
    let amount: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;

    if !amount.is_finite() || amount < 0.0 {
        return Err(format!("'{value}' must be a non-negative number"));
    }

    Ok(amount)
}

fn parse_port(range: &str, bound: &str) -> Result<u16> {
    bound
        .trim()
        .parse()
        .map_err(|_| Error::parse(range, "range bound is not a port number"))
}

impl FromStr for Ranges {
    type Err = Error;

    /// Parses `[a-b, c-d, ...]`
    fn from_str(s: &str) -> Result<Self> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| Error::parse(s, "ranges must be enclosed in '[' and ']'"))?;

        let ranges = inner
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| {
                let (begin, end) = r
                    .split_once('-')
                    .ok_or_else(|| Error::parse(r, "expected 'begin-end'"))?;
                let begin = parse_port(r, begin)?;
                let end = parse_port(r, end)?;
                PortRange::new(begin, end).map_err(|e| Error::parse(r, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        if ranges.is_empty() {
            return Err(Error::parse(s, "at least one range is required"));
        }

        Ok(Self::from_ranges(ranges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> Role {
        Role::default()
    }

    #[test]
    fn empty_input_is_empty_set() {
        assert!(parse("", &star()).unwrap().is_empty());
        assert!(parse("   ", &star()).unwrap().is_empty());
    }

    #[test]
    fn parses_every_dimension() {
        let set = parse("cpus:2; mem:4096; disk:20480; ports:[31000-32000]", &star()).unwrap();

        assert_eq!(set.len(), 4);
        assert_eq!(set.cpus(), Some(2.0));
        assert_eq!(set.mem(), Some(ByteSize::from_mb(4096)));
        assert_eq!(set.disk(), Some(ByteSize::from_mb(20480)));
        assert_eq!(set.ports().unwrap().to_string(), "[31000-32000]");
    }

    #[test]
    fn explicit_role_overrides_default() {
        let set = parse("cpus(prod):1.5;cpus:0.5", &star()).unwrap();

        let prod = Role::new("prod").unwrap();
        assert_eq!(set.get(Dimension::Cpus, &prod), Some(&Quantity::Scalar(1.5)));
        assert_eq!(set.get(Dimension::Cpus, &star()), Some(&Quantity::Scalar(0.5)));
    }

    #[test]
    fn trailing_separator_tolerated() {
        assert_eq!(parse("cpus:4;", &star()).unwrap().len(), 1);
    }

    #[test]
    fn fractional_megabytes_rejected() {
        let err = parse("mem:1.75", &star()).unwrap_err();
        assert!(err.to_string().contains("whole number"), "{err}");
        assert!(parse("disk:0.5", &star()).is_err());

        let set = parse("mem:2.0", &star()).unwrap();
        assert_eq!(set.mem(), Some(ByteSize::from_mb(2)));
    }

    #[test]
    fn port_bounds_limited_to_16_bits() {
        let set = parse("ports:[0-65535]", &star()).unwrap();
        assert_eq!(set.ports().unwrap().port_count(), 65536);

        for raw in ["ports:[0-18446744073709551615]", "ports:[31000-70000]"] {
            let err = parse(raw, &star()).unwrap_err();
            assert!(err.to_string().contains("not a port number"), "{err}");
        }
    }

    #[test]
    fn rejects_malformed_input() {
        for raw in [
            "cpus",
            "cpus:two",
            "cpus:-1",
            "cpus:NaN",
            "gpus:1",
            "mem(prod:1",
            "mem(a b):1",
            "ports:31000-32000",
            "ports:[32000-31000]",
            "ports:[]",
            "ports:[a-b]",
        ] {
            let result = parse(raw, &star());
            assert!(
                matches!(result, Err(Error::ConfigParse { .. })),
                "expected parse error for {raw:?}, got {result:?}"
            );
        }
    }

    #[test]
    fn rejects_duplicate_key() {
        let err = parse("cpus:1;cpus:2", &star()).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn display_round_trips() {
        let set = parse("cpus(prod):2;mem:7168;ports:[1-2, 5-9]", &star()).unwrap();
        let again = parse(&set.to_string(), &star()).unwrap();
        assert_eq!(set, again);
    }
}
