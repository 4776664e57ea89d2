use std::collections::BTreeSet;

use rand::prelude::*;
use subset_store::types::test_types::{Age, Pet, PetKey, Species, TestKv};
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

const SPECIES: [&str; 4] = ["cat", "dog", "fish", "bird"];

struct Pets {
    kv: IndexedKv<TestKv>,
    species: PredicateHandle,
    age: PredicateHandle,
}

fn pets_store() -> Result<Pets, Box<dyn std::error::Error>> {
    let kv = IndexedKv::new(TestKv::new());
    let species = kv
        .register_group::<Species>(
            GroupSpec::default(),
            vec![PredicateSpec::new("species", |p: &Pet| {
                Some(Species::from(p.species.as_str()))
            })],
        )?
        .remove(0);
    let age = kv
        .register_group::<Age>(
            GroupSpec::default(),
            vec![PredicateSpec::new("age", |p: &Pet| Some(Age(p.age)))],
        )?
        .remove(0);
    Ok(Pets { kv, species, age })
}

// A random mixed workload over a small key space, so updates and deletes
// hit existing records often.
fn run_workload(
    pets: &Pets,
    ops: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = rand::rng();
    for _ in 0..ops {
        let key = rng.random_range(0..24u64);
        if rng.random_bool(0.2) {
            pets.kv.delete(&key)?;
        } else {
            let species = SPECIES[rng.random_range(0..SPECIES.len())];
            let age = rng.random_range(0..6u8);
            pets.kv
                .upsert(key, Pet::new(key, species, age, "small"))?;
        }
    }
    Ok(())
}

fn queried_ids(
    pets: &Pets,
    species: &str,
) -> Result<Vec<RecordId>, Box<dyn std::error::Error>> {
    Ok(pets
        .kv
        .query_single(
            &pets.species,
            Species::from(species),
            QueryOptions::default(),
        )?
        .iter()
        .map(|r| r.0)
        .collect())
}

fn expected_ids(pets: &Pets, species: &str) -> Vec<RecordId> {
    let mut ids: Vec<RecordId> = pets
        .kv
        .provider()
        .live_records()
        .into_iter()
        .filter(|(_, p)| p.species == species)
        .map(|(id, _)| id)
        .collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids
}

// Chain closure and query-equals-set: every (predicate, key) query
// enumerates exactly the live records whose predicate produced the key,
// newest first, without duplicates.
#[test]
fn live_chains_equal_provider_state(
) -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let pets = pets_store()?;
    run_workload(&pets, 400)?;

    for species in SPECIES {
        let got = queried_ids(&pets, species)?;
        assert_eq!(got, expected_ids(&pets, species), "species {species}");
        assert!(
            got.windows(2).all(|w| w[0] > w[1]),
            "strictly decreasing, no duplicates"
        );
    }

    for age in 0..6u8 {
        let got: Vec<RecordId> = pets
            .kv
            .query_single(&pets.age, Age(age), QueryOptions::default())?
            .iter()
            .map(|r| r.0)
            .collect();
        let mut expected: Vec<RecordId> = pets
            .kv
            .provider()
            .live_records()
            .into_iter()
            .filter(|(_, p)| p.age == age)
            .map(|(id, _)| id)
            .collect();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(got, expected, "age {age}");
    }
    Ok(())
}

// Boolean composition: `and` is the intersection of the single-predicate
// sets, `or` the union.
#[test]
fn boolean_composition_matches_set_algebra(
) -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let pets = pets_store()?;
    run_workload(&pets, 400)?;

    for species in SPECIES {
        for age in 0..6u8 {
            let species_set: BTreeSet<RecordId> =
                queried_ids(&pets, species)?.into_iter().collect();
            let age_set: BTreeSet<RecordId> = pets
                .kv
                .query_single(&pets.age, Age(age), QueryOptions::default())?
                .iter()
                .map(|r| r.0)
                .collect();

            let both: BTreeSet<RecordId> = pets
                .kv
                .query2(
                    &pets.species,
                    Species::from(species),
                    BoolOp::And,
                    &pets.age,
                    Age(age),
                    QueryOptions::default(),
                )?
                .iter()
                .map(|r| r.0)
                .collect();
            let either: BTreeSet<RecordId> = pets
                .kv
                .query2(
                    &pets.species,
                    Species::from(species),
                    BoolOp::Or,
                    &pets.age,
                    Age(age),
                    QueryOptions::default(),
                )?
                .iter()
                .map(|r| r.0)
                .collect();

            assert_eq!(
                both,
                species_set.intersection(&age_set).copied().collect(),
                "{species} and {age}"
            );
            assert_eq!(
                either,
                species_set.union(&age_set).copied().collect(),
                "{species} or {age}"
            );
        }
    }
    Ok(())
}

// An update whose before and after keys agree leaves the result sets
// unchanged (by record identity, i.e. the pets found), while the head
// record id advances.
#[test]
fn identical_key_update_is_idempotent(
) -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let pets = pets_store()?;
    run_workload(&pets, 200)?;
    let Some((_, pet)) =
        pets.kv.provider().live_records().into_iter().next()
    else {
        return Ok(());
    };

    let pet_sets_per_species =
        |pets: &Pets| -> Result<Vec<BTreeSet<u64>>, Box<dyn std::error::Error>> {
            SPECIES
                .iter()
                .map(|s| {
                    Ok(pets
                        .kv
                        .query_single(
                            &pets.species,
                            Species::from(*s),
                            QueryOptions::default(),
                        )?
                        .iter()
                        .map(|r| r.1.id)
                        .collect())
                })
                .collect()
        };

    let before = pet_sets_per_species(&pets)?;
    let new_id = pets.kv.upsert(pet.id, pet.clone())?;
    let after = pet_sets_per_species(&pets)?;

    assert_eq!(before, after);
    // The rewritten record is now found under its new id.
    assert!(queried_ids(&pets, &pet.species)?.contains(&new_id));
    Ok(())
}

// After a delete, no query yields anything for the deleted primary key.
#[test]
fn deletion_is_final() -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let pets = pets_store()?;
    run_workload(&pets, 200)?;
    let Some((_, pet)) =
        pets.kv.provider().live_records().into_iter().next()
    else {
        return Ok(());
    };

    assert!(pets.kv.delete(&pet.id)?);

    for species in SPECIES {
        let hit = pets
            .kv
            .query_single(
                &pets.species,
                Species::from(species),
                QueryOptions::default(),
            )?
            .iter()
            .any(|r| r.1.id == pet.id);
        assert!(!hit, "deleted pet found under species {species}");
    }
    for age in 0..6u8 {
        let hit = pets
            .kv
            .query_single(&pets.age, Age(age), QueryOptions::default())?
            .iter()
            .any(|r| r.1.id == pet.id);
        assert!(!hit, "deleted pet found under age {age}");
    }
    Ok(())
}

// Records for which every predicate of a group yields None leave no
// trace in that group's log.
#[test]
fn all_null_records_append_nothing(
) -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let kv = IndexedKv::new(TestKv::new());
    let only_dogs = kv
        .register_group::<PetKey>(
            GroupSpec::default(),
            vec![PredicateSpec::new("only_dogs", |p: &Pet| {
                (p.species == "dog").then(|| PetKey::age(p.age))
            })],
        )?
        .remove(0);

    for key in 0..10u64 {
        kv.upsert(key, Pet::new(key, "cat", (key % 6) as u8, "small"))?;
    }

    let stats = kv.index().stats();
    let group = &stats[only_dogs.group_id() as usize];
    assert_eq!(group.log_tail, 0, "no secondary bytes for all-null records");
    assert_eq!(group.records, 0);
    assert_eq!(kv.index().group_counters(&only_dogs)?.records_count(), 0);

    kv.upsert(11, Pet::new(11, "dog", 2, "large"))?;
    let stats = kv.index().stats();
    assert!(stats[only_dogs.group_id() as usize].log_tail > 0);
    Ok(())
}

// Two successive inserts under the same key chain come back newest
// first.
#[test]
fn insertion_order_is_newest_first() -> Result<(), Box<dyn std::error::Error>>
{
    common::init();
    let pets = pets_store()?;

    let r1 = pets.kv.upsert(1, Pet::new(1, "cat", 1, "small"))?;
    let r2 = pets.kv.upsert(2, Pet::new(2, "cat", 2, "small"))?;
    assert!(r1 < r2);

    assert_eq!(queried_ids(&pets, "cat")?, vec![r2, r1]);
    Ok(())
}
