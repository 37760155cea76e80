use keel_core::*;

fn star() -> Role {
    Role::default()
}

#[test]
fn test_role_validation() {
    // Valid roles
    assert!(Role::new("*").is_ok());
    assert!(Role::new("prod").is_ok());
    assert!(Role::new("team-a_1").is_ok());
    assert!(Role::new("a.b").is_ok());

    // Invalid roles - empty
    assert!(Role::new("").is_err());

    // Invalid roles - override syntax characters
    assert!(Role::new("a b").is_err());
    assert!(Role::new("a(b").is_err());
    assert!(Role::new("a)b").is_err());
    assert!(Role::new("a:b").is_err());
    assert!(Role::new("a;b").is_err());
    assert!(Role::new("a,b").is_err());
}

#[test]
fn test_parse_then_overlay() {
    let base = parse("cpus:1; mem:512", &star()).unwrap();
    let over = parse("cpus:8", &star()).unwrap();

    let result = base.overlay(over);
    assert_eq!(result.len(), 2);
    assert_eq!(result.cpus(), Some(8.0));
    assert_eq!(result.mem(), Some(ByteSize::from_mb(512)));
}

#[test]
fn test_parse_then_merge_collision() {
    let a = parse("mem:512", &star()).unwrap();
    let b = parse("mem:1024", &star()).unwrap();

    match a.merge(b) {
        Err(Error::DuplicateResource { name, role }) => {
            assert_eq!(name, "mem");
            assert_eq!(role, "*");
        }
        other => panic!("expected duplicate error, got {other:?}"),
    }
}

#[test]
fn test_totals_span_roles() {
    let set = parse(
        "mem:1024; mem(prod):2048; ports:[100-200]; ports(prod):[150-300]",
        &star(),
    )
    .unwrap();

    assert_eq!(set.count(Dimension::Mem), 2);
    assert_eq!(set.mem(), Some(ByteSize::from_mb(3072)));
    assert_eq!(set.ports().unwrap().to_string(), "[100-300]");
    assert!(!set.has_dimension(Dimension::Disk));
}

#[test]
fn test_resource_set_json_shape() {
    let set = parse("cpus:2", &star()).unwrap();
    let json = serde_json::to_value(&set).unwrap();

    assert_eq!(
        json,
        serde_json::json!([
            {"name": "cpus", "role": "*", "value": {"type": "scalar", "value": 2.0}}
        ])
    );
}

#[test]
fn test_duplicate_entries_rejected_on_deserialize() {
    let json = r#"[
        {"name": "cpus", "role": "*", "value": {"type": "scalar", "value": 1.0}},
        {"name": "cpus", "role": "*", "value": {"type": "scalar", "value": 2.0}}
    ]"#;

    assert!(serde_json::from_str::<ResourceSet>(json).is_err());
}

#[test]
fn test_default_config() {
    let config = NodeConfig::default();
    assert_eq!(config.default_role, star());
    assert_eq!(config.isolation, "process");
    assert_eq!(config.defaults.cpus, keel_core::config::DEFAULT_CPUS);
    assert_eq!(config.defaults.mem, keel_core::config::DEFAULT_MEM);
    assert_eq!(config.defaults.disk, keel_core::config::DEFAULT_DISK);
}
