use subset_store::types::test_types::{Pet, SizeClass, Species, TestKv};
use subset_store::{
    GroupSpec, IndexError, IndexedKv, PredicateSpec, QueryOptions, RecordId,
};

mod common {
    use std::io::Write;

    pub fn init() {
        let _ = env_logger::builder()
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .is_test(true)
            .try_init();
    }
}

fn ids(results: &[(RecordId, Pet)]) -> Vec<RecordId> {
    results.iter().map(|r| r.0).collect()
}

#[test]
fn cross_group_composition() -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let kv = IndexedKv::new(TestKv::new());

    // Two groups over different key types.
    let species = kv
        .register_group::<Species>(
            GroupSpec::default(),
            vec![PredicateSpec::new("species", |p: &Pet| {
                Some(Species::from(p.species.as_str()))
            })],
        )?
        .remove(0);
    let size = kv
        .register_group::<SizeClass>(
            GroupSpec::default(),
            vec![PredicateSpec::new("size", |p: &Pet| {
                Some(SizeClass::from(p.size.as_str()))
            })],
        )?
        .remove(0);

    let r1 = kv.upsert(1, Pet::new(1, "cat", 3, "small"))?;
    let _r2 = kv.upsert(2, Pet::new(2, "cat", 5, "large"))?;
    let r3 = kv.upsert(3, Pet::new(3, "dog", 2, "large"))?;
    let r4 = kv.upsert(4, Pet::new(4, "cat", 1, "small"))?;

    // (species == cat && size == small) || species == dog
    let spec = vec![
        vec![kv.index().operand(&species, &[Species::from("cat")])?],
        vec![kv.index().operand(&size, &[SizeClass::from("small")])?],
        vec![kv.index().operand(&species, &[Species::from("dog")])?],
    ];
    let results = kv.query(
        spec,
        |m| (m.get(0, 0) && m.get(1, 0)) || m.get(2, 0),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&results), vec![r4, r3, r1]);
    Ok(())
}

#[test]
fn key_set_operands_union_their_chains(
) -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let kv = IndexedKv::new(TestKv::new());
    let species = kv
        .register_group::<Species>(
            GroupSpec::default(),
            vec![PredicateSpec::new("species", |p: &Pet| {
                Some(Species::from(p.species.as_str()))
            })],
        )?
        .remove(0);

    let r1 = kv.upsert(1, Pet::new(1, "cat", 3, "small"))?;
    let r2 = kv.upsert(2, Pet::new(2, "dog", 5, "large"))?;
    let _r3 = kv.upsert(3, Pet::new(3, "fish", 1, "small"))?;

    let spec = vec![vec![kv.index().operand(
        &species,
        &[Species::from("cat"), Species::from("dog")],
    )?]];
    let results =
        kv.query(spec, |m| m.get(0, 0), QueryOptions::default())?;
    assert_eq!(ids(&results), vec![r2, r1]);
    Ok(())
}

#[test]
fn duplicate_names_fail_across_groups(
) -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let kv = IndexedKv::new(TestKv::new());
    kv.register_group::<Species>(
        GroupSpec::default(),
        vec![PredicateSpec::new("species", |p: &Pet| {
            Some(Species::from(p.species.as_str()))
        })],
    )?;

    let err = kv
        .register_group::<SizeClass>(
            GroupSpec::default(),
            vec![PredicateSpec::new("species", |p: &Pet| {
                Some(SizeClass::from(p.size.as_str()))
            })],
        )
        .unwrap_err();
    assert_eq!(err, IndexError::DuplicatePredicateName);

    // The failed registration left nothing behind.
    assert_eq!(kv.index().group_count(), 1);
    Ok(())
}
