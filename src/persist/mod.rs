use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crossbeam_epoch as epoch;
use log::{error, info, trace};
use roaring::RoaringTreemap;
use serde_derive::{Deserialize, Serialize};
use zerocopy::byteorder::{NativeEndian, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::group::GroupCore;
use crate::types::errors::IndexError;

const MANIFEST_FILE: &str = "MANIFEST.json";
const TABLE_FILE: &str = "table.dat";
const LOG_FILE: &str = "log.dat";
const RETIRED_FILE: &str = "retired.dat";

const TABLE_MAGIC: [u8; 8] = *b"SSIDXTBL";
const LOG_MAGIC: [u8; 8] = *b"SSIDXLOG";
const FORMAT_VERSION: u32 = 1;

//------------ Manifest ------------------------------------------------------

// The checkpoint manifest binds the group's identity: its geometry and,
// above all, the ordinal order of its predicate names. Recovery refuses
// a group whose re-registered names disagree with the manifest, because
// chain entries address predicates by ordinal. The manifest is written
// last; its presence is what makes a checkpoint directory valid.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct Manifest {
    format_version: u32,
    group_id: u32,
    key_size: usize,
    hash_table_size: usize,
    log_page_size: usize,
    log_segment_size: usize,
    log_memory_size: usize,
    predicates: Vec<String>,
}

impl Manifest {
    fn for_group(core: &GroupCore) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            group_id: core.id,
            key_size: core.key_size,
            hash_table_size: core.spec.hash_table_size,
            log_page_size: core.spec.log_page_size,
            log_segment_size: core.spec.log_segment_size,
            log_memory_size: core.spec.log_memory_size,
            predicates: core
                .names
                .iter()
                .map(|n| n.to_string())
                .collect(),
        }
    }
}

//------------ File headers --------------------------------------------------

#[derive(
    Debug, KnownLayout, Immutable, Unaligned, IntoBytes, FromBytes,
)]
#[repr(C, packed)]
struct TableHeader {
    magic: [u8; 8],
    format_version: U32<NativeEndian>,
    bucket_count: U64<NativeEndian>,
}

#[derive(
    Debug, KnownLayout, Immutable, Unaligned, IntoBytes, FromBytes,
)]
#[repr(C, packed)]
struct LogHeader {
    magic: [u8; 8],
    format_version: U32<NativeEndian>,
    page_size: U64<NativeEndian>,
    tail: U64<NativeEndian>,
}

//------------ Checkpoint ----------------------------------------------------

fn persist_failed(what: &str, path: &Path, err: &io::Error) -> IndexError {
    error!("persist: {} {} failed: {}", what, path.display(), err);
    IndexError::PersistFailed
}

fn write_file(
    path: &PathBuf,
    write: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> Result<(), IndexError> {
    let run = || -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    };
    run().map_err(|e| persist_failed("writing", path, &e))
}

fn write_table(core: &GroupCore, dir: &Path) -> Result<(), IndexError> {
    let heads = core.table.snapshot();
    let header = TableHeader {
        magic: TABLE_MAGIC,
        format_version: U32::new(FORMAT_VERSION),
        bucket_count: U64::new(heads.len() as u64),
    };
    write_file(&dir.join(TABLE_FILE), |w| {
        w.write_all(header.as_bytes())?;
        w.write_all(heads.as_bytes())
    })
}

fn write_log(core: &GroupCore, dir: &Path) -> Result<(), IndexError> {
    let tail = core.log.tail();
    let header = LogHeader {
        magic: LOG_MAGIC,
        format_version: U32::new(FORMAT_VERSION),
        page_size: U64::new(core.log.page_size() as u64),
        tail: U64::new(tail),
    };
    write_file(&dir.join(LOG_FILE), |w| {
        w.write_all(header.as_bytes())?;
        core.log.for_each_page(|idx, page| {
            trace!("persist: group {} page {}", core.id, idx);
            w.write_all(page)
        })?;
        Ok(())
    })
}

fn write_retired(core: &GroupCore, dir: &Path) -> Result<(), IndexError> {
    let guard = &epoch::pin();
    let retired = core
        .retired_snapshot(guard)
        .cloned()
        .unwrap_or_default();
    write_file(&dir.join(RETIRED_FILE), |w| retired.serialize_into(w))
}

/// Writes a full checkpoint of one group into its checkpoint directory:
/// hash table, log pages, retired bitmap, manifest last.
pub(crate) fn checkpoint_group(
    core: &GroupCore,
) -> Result<(), IndexError> {
    let dir = core.spec.checkpoint_dir.clone();
    fs::create_dir_all(&dir)
        .map_err(|e| persist_failed("creating", &dir, &e))?;

    write_table(core, &dir)?;
    write_log(core, &dir)?;
    write_retired(core, &dir)?;

    let manifest = Manifest::for_group(core);
    write_file(&dir.join(MANIFEST_FILE), |w| {
        serde_json::to_writer_pretty(w, &manifest)
            .map_err(io::Error::other)
    })?;

    info!(
        "persist: group {} checkpoint at {} (tail {})",
        core.id,
        dir.display(),
        core.log.tail()
    );
    Ok(())
}

/// Refreshes the log image and retired bitmap of an existing checkpoint.
///
/// The hash table is not rewritten: a newer log with an older table is
/// coherent, the extra log bytes are simply unreachable until the next
/// full checkpoint.
pub(crate) fn flush_group(core: &GroupCore) -> Result<(), IndexError> {
    let dir = core.spec.checkpoint_dir.clone();
    if !dir.join(MANIFEST_FILE).exists() {
        return checkpoint_group(core);
    }
    write_log(core, &dir)?;
    write_retired(core, &dir)
}

//------------ Recovery ------------------------------------------------------

fn read_file<T>(
    path: &PathBuf,
    read: impl FnOnce(&mut BufReader<File>) -> io::Result<T>,
) -> Result<T, IndexError> {
    let run = || -> io::Result<T> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        read(&mut reader)
    };
    run().map_err(|e| persist_failed("reading", path, &e))
}

fn read_exact_vec(
    reader: &mut impl Read,
    len: usize,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Re-attaches one registered group to its checkpoint directory.
///
/// The group must have been re-registered with the same geometry and the
/// same predicate names in the same ordinal order; a name bound to a
/// different ordinal would silently rewire every chain, so any manifest
/// disagreement fails with [IndexError::RecoveryMismatch].
pub(crate) fn recover_group(core: &GroupCore) -> Result<(), IndexError> {
    let dir = core.spec.checkpoint_dir.clone();

    let manifest: Manifest =
        read_file(&dir.join(MANIFEST_FILE), |r| {
            serde_json::from_reader(r).map_err(io::Error::other)
        })?;
    if manifest != Manifest::for_group(core) {
        error!(
            "persist: group {} manifest mismatch at {}",
            core.id,
            dir.display()
        );
        return Err(IndexError::RecoveryMismatch);
    }

    // Hash table.
    read_file(&dir.join(TABLE_FILE), |r| {
        let header_bytes =
            read_exact_vec(r, size_of::<TableHeader>())?;
        let header = TableHeader::ref_from_bytes(&header_bytes)
            .map_err(|_| io::Error::other("bad table header"))?;
        if header.magic != TABLE_MAGIC
            || header.format_version.get() != FORMAT_VERSION
            || header.bucket_count.get() != core.table.len() as u64
        {
            return Err(io::Error::other("table header mismatch"));
        }
        let raw = read_exact_vec(r, core.table.len() * 8)?;
        let heads: Vec<u64> = raw
            .chunks_exact(8)
            .map(|c| {
                u64::from_ne_bytes(c.try_into().expect("chunk of 8"))
            })
            .collect();
        core.table
            .restore(&heads)
            .map_err(|_| io::Error::other("bad table image"))
    })?;

    // Log pages.
    read_file(&dir.join(LOG_FILE), |r| {
        let header_bytes = read_exact_vec(r, size_of::<LogHeader>())?;
        let header = LogHeader::ref_from_bytes(&header_bytes)
            .map_err(|_| io::Error::other("bad log header"))?;
        let page_size = core.log.page_size();
        if header.magic != LOG_MAGIC
            || header.format_version.get() != FORMAT_VERSION
            || header.page_size.get() != page_size as u64
        {
            return Err(io::Error::other("log header mismatch"));
        }
        let tail = header.tail.get();
        let pages = (tail as usize).div_ceil(page_size);
        for idx in 0..pages {
            let page = read_exact_vec(r, page_size)?;
            core.log
                .restore_page(idx, &page)
                .map_err(|_| io::Error::other("bad log image"))?;
        }
        core.log
            .restore_tail(tail)
            .map_err(|_| io::Error::other("bad log tail"))
    })?;

    // Retired bitmap.
    let retired = read_file(&dir.join(RETIRED_FILE), |r| {
        RoaringTreemap::deserialize_from(r)
    })?;
    core.restore_retired(retired);

    info!(
        "persist: group {} recovered from {}",
        core.id,
        dir.display()
    );
    Ok(())
}
