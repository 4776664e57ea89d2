use std::collections::BTreeSet;
use std::sync::Arc;

use subset_store::types::test_types::{Pet, Species, TestKv};
use subset_store::{
    GroupSpec, IndexedKv, PredicateHandle, PredicateSpec, QueryOptions,
    RecordId,
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

const SPECIES: [&str; 3] = ["cat", "dog", "fish"];

fn pets_store(
) -> Result<(Arc<IndexedKv<TestKv>>, PredicateHandle), Box<dyn std::error::Error>>
{
    let kv = IndexedKv::new(TestKv::new());
    let species = kv
        .register_group::<Species>(
            GroupSpec::default(),
            vec![PredicateSpec::new("species", |p: &Pet| {
                Some(Species::from(p.species.as_str()))
            })],
        )?
        .remove(0);
    Ok((Arc::new(kv), species))
}

#[test]
fn concurrent_writers_agree_with_provider(
) -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let (kv, species) = pets_store()?;

    let writers: Vec<_> = (0..3u64)
        .map(|writer| {
            let kv = Arc::clone(&kv);
            std::thread::Builder::new()
                .name(writer.to_string())
                .spawn(move || {
                    for i in 0..200u64 {
                        let key = writer * 1000 + (i % 50);
                        let species =
                            SPECIES[(i % SPECIES.len() as u64) as usize];
                        kv.upsert(
                            key,
                            Pet::new(key, species, (i % 7) as u8, "small"),
                        )
                        .expect("upsert");
                        if i % 11 == 0 {
                            kv.delete(&key).expect("delete");
                        }
                    }
                })
                .expect("spawn")
        })
        .collect();

    // Query while the writers run; results must always be valid live
    // snapshots, whatever they contain.
    let reader = {
        let kv = Arc::clone(&kv);
        let species = species.clone();
        std::thread::Builder::new()
            .name("reader".into())
            .spawn(move || {
                for _ in 0..100 {
                    for s in SPECIES {
                        let results = kv
                            .query_single(
                                &species,
                                Species::from(s),
                                QueryOptions::default(),
                            )
                            .expect("query");
                        for (_, pet) in results {
                            assert_eq!(pet.species, s);
                        }
                    }
                }
            })
            .expect("spawn")
    };

    for writer in writers {
        writer.join().expect("writer thread");
    }
    reader.join().expect("reader thread");

    // Settled state: every species query equals the provider's live set.
    for s in SPECIES {
        let got: BTreeSet<RecordId> = kv
            .query_single(&species, Species::from(s), QueryOptions::default())?
            .iter()
            .map(|r| r.0)
            .collect();
        let expected: BTreeSet<RecordId> = kv
            .provider()
            .live_records()
            .into_iter()
            .filter(|(_, p)| p.species == s)
            .map(|(id, _)| id)
            .collect();
        assert_eq!(got, expected, "species {s}");
    }
    Ok(())
}
