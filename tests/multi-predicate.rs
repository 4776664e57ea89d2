use subset_store::types::test_types::{Pet, PetKey, TestKv};
use subset_store::{
    BoolOp, GroupSpec, IndexedKv, PredicateHandle, PredicateSpec,
    QueryOptions, RecordId,
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

struct Pets {
    kv: IndexedKv<TestKv>,
    species: PredicateHandle,
    age: PredicateHandle,
    only_dogs: PredicateHandle,
}

fn pets_store(in_place: bool) -> Result<Pets, Box<dyn std::error::Error>> {
    let kv = IndexedKv::new(if in_place {
        TestKv::with_in_place_updates()
    } else {
        TestKv::new()
    });
    let handles = kv.register_group::<PetKey>(
        GroupSpec::default(),
        vec![
            PredicateSpec::new("species", |p: &Pet| {
                Some(PetKey::species(p.species.as_str()))
            }),
            PredicateSpec::new("age", |p: &Pet| Some(PetKey::age(p.age))),
            PredicateSpec::new("only_dogs", |p: &Pet| {
                (p.species == "dog").then(|| PetKey::age(p.age))
            }),
        ],
    )?;
    Ok(Pets {
        kv,
        species: handles[0].clone(),
        age: handles[1].clone(),
        only_dogs: handles[2].clone(),
    })
}

fn ids(results: &[(RecordId, Pet)]) -> Vec<RecordId> {
    results.iter().map(|r| r.0).collect()
}

#[test]
fn two_predicates_same_group() -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let pets = pets_store(false)?;

    let r1 = pets.kv.upsert(1, Pet::new(1, "cat", 3, "small"))?;
    let _r2 = pets.kv.upsert(2, Pet::new(2, "cat", 4, "small"))?;

    let both = pets.kv.query2(
        &pets.species,
        PetKey::species("cat"),
        BoolOp::And,
        &pets.age,
        PetKey::age(3),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&both), vec![r1]);

    let either = pets.kv.query2(
        &pets.species,
        PetKey::species("dog"),
        BoolOp::Or,
        &pets.age,
        PetKey::age(3),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&either), vec![r1]);
    Ok(())
}

#[test]
fn key_changing_update() -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let pets = pets_store(false)?;

    let _r1 = pets.kv.upsert(1, Pet::new(1, "cat", 3, "small"))?;
    let r2 = pets.kv.upsert(2, Pet::new(2, "cat", 4, "small"))?;
    // The age change retires the old chain entry and produces a new
    // record id.
    let r1b = pets.kv.upsert(1, Pet::new(1, "cat", 5, "small"))?;

    let age3 = pets.kv.query_single(
        &pets.age,
        PetKey::age(3),
        QueryOptions::default(),
    )?;
    assert!(age3.is_empty());

    let age5 = pets.kv.query_single(
        &pets.age,
        PetKey::age(5),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&age5), vec![r1b]);

    let age4 = pets.kv.query_single(
        &pets.age,
        PetKey::age(4),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&age4), vec![r2]);
    Ok(())
}

#[test]
fn key_changing_update_in_place() -> Result<(), Box<dyn std::error::Error>>
{
    common::init();
    let pets = pets_store(true)?;

    let r1 = pets.kv.upsert(1, Pet::new(1, "cat", 3, "small"))?;
    // In place: the record id does not advance, so only the chain
    // tombstone can hide the old age key.
    let r1b = pets.kv.upsert(1, Pet::new(1, "cat", 5, "small"))?;
    assert_eq!(r1, r1b);

    let age3 = pets.kv.query_single(
        &pets.age,
        PetKey::age(3),
        QueryOptions::default(),
    )?;
    assert!(age3.is_empty());

    let age5 = pets.kv.query_single(
        &pets.age,
        PetKey::age(5),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&age5), vec![r1]);

    let cats = pets.kv.query_single(
        &pets.species,
        PetKey::species("cat"),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&cats), vec![r1]);
    Ok(())
}

#[test]
fn delete_withdraws_every_key() -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let pets = pets_store(false)?;

    let _r1 = pets.kv.upsert(1, Pet::new(1, "cat", 3, "small"))?;
    let _r2 = pets.kv.upsert(2, Pet::new(2, "cat", 4, "small"))?;
    let r1b = pets.kv.upsert(1, Pet::new(1, "cat", 5, "small"))?;

    assert!(pets.kv.delete(&2)?);
    assert!(!pets.kv.delete(&2)?);

    let cats = pets.kv.query_single(
        &pets.species,
        PetKey::species("cat"),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&cats), vec![r1b]);

    let age4 = pets.kv.query_single(
        &pets.age,
        PetKey::age(4),
        QueryOptions::default(),
    )?;
    assert!(age4.is_empty());
    Ok(())
}

#[test]
fn partial_predicate_stays_null() -> Result<(), Box<dyn std::error::Error>>
{
    common::init();
    let pets = pets_store(false)?;

    let _r3 = pets.kv.upsert(3, Pet::new(3, "cat", 7, "small"))?;

    // The cat never entered the only_dogs chains.
    let dogs_aged_7 = pets.kv.query_single(
        &pets.only_dogs,
        PetKey::age(7),
        QueryOptions::default(),
    )?;
    assert!(dogs_aged_7.is_empty());

    // But a dog of the same age does.
    let r4 = pets.kv.upsert(4, Pet::new(4, "dog", 7, "large"))?;
    let dogs_aged_7 = pets.kv.query_single(
        &pets.only_dogs,
        PetKey::age(7),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&dogs_aged_7), vec![r4]);
    Ok(())
}

#[test]
fn update_into_and_out_of_a_partial_predicate(
) -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let pets = pets_store(false)?;

    let _r1 = pets.kv.upsert(1, Pet::new(1, "cat", 2, "small"))?;
    // Becomes a dog: only_dogs gains a key that was null before.
    let r1b = pets.kv.upsert(1, Pet::new(1, "dog", 2, "small"))?;

    let result = pets.kv.query_single(
        &pets.only_dogs,
        PetKey::age(2),
        QueryOptions::default(),
    )?;
    assert_eq!(ids(&result), vec![r1b]);

    // And back to a cat: the key goes null again.
    let _r1c = pets.kv.upsert(1, Pet::new(1, "cat", 2, "small"))?;
    let result = pets.kv.query_single(
        &pets.only_dogs,
        PetKey::age(2),
        QueryOptions::default(),
    )?;
    assert!(result.is_empty());
    Ok(())
}
