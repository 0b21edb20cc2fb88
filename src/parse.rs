//! Concurrent blueprint-file walker.
//!
//! Files are read and parsed on a worker pool, but the visitor sees them in a
//! deterministic order no matter how parsing interleaves: seeds in seed-list
//! order, then transitively discovered files in lexical path order beneath
//! the parent that first listed them. Determinism comes from separating the
//! two commitments: a file is *spawned* (queued for parsing) the moment any
//! result mentions it, but is *scheduled* (given its visit slot) only when
//! the earlier file that references it is itself flushed to the visitor.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, trace};

use crate::errors::Error;
use crate::fs::FileSystem;
use crate::syntax::{FileParser, ParsedFile};

/// Conventional blueprint file name looked up inside `subdirs` entries when
/// the seed file's own name is unavailable.
pub(crate) const DEFAULT_FILE_NAME: &str = "Blueprints";

struct FileResult {
    file: ParsedFile,
    errs: Vec<Error>,
}

/// References a parsed file makes to further blueprint files, resolved
/// against the file's directory, deduplicated, in lexical order.
fn child_paths(file: &ParsedFile, subfile_name: &str) -> Vec<Utf8PathBuf> {
    let dir = file
        .path
        .parent()
        .map_or_else(Utf8PathBuf::new, Utf8Path::to_path_buf);
    let mut children: Vec<Utf8PathBuf> = file
        .subdirs
        .iter()
        .map(|sub| dir.join(sub).join(subfile_name))
        .chain(file.build.iter().map(|path| dir.join(path)))
        .collect();
    children.sort();
    children.dedup();
    children
}

/// Walk blueprint files from `seeds`, invoking `visitor` for each parsed
/// file in deterministic order. Returns the ordered list of files visited
/// and the accumulated errors.
///
/// When `follow_refs` is false only the seeds themselves are parsed.
pub(crate) fn walk_blueprint_files(
    fs: &dyn FileSystem,
    parser: &dyn FileParser,
    pool_size: usize,
    seeds: &[Utf8PathBuf],
    subfile_name: &str,
    follow_refs: bool,
    visitor: &mut dyn FnMut(&ParsedFile),
) -> (Vec<Utf8PathBuf>, Vec<Error>) {
    let pool_size = pool_size.max(1);
    let mut schedule: Vec<Utf8PathBuf> = Vec::new();
    let mut scheduled: HashSet<Utf8PathBuf> = HashSet::new();
    for seed in seeds {
        if scheduled.insert(seed.clone()) {
            schedule.push(seed.clone());
        }
    }
    let mut errs = Vec::new();

    thread::scope(|scope| {
        let (job_tx, job_rx) = mpsc::channel::<Utf8PathBuf>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::channel::<(Utf8PathBuf, FileResult)>();

        for _ in 0..pool_size {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                loop {
                    let job = { job_rx.lock().expect("job queue lock").recv() };
                    let Ok(path) = job else { break };
                    let result = match fs.read_file(&path) {
                        Ok(bytes) => match String::from_utf8(bytes) {
                            Ok(source) => {
                                let (file, errs) = parser.parse(&path, &source);
                                FileResult { file, errs }
                            }
                            Err(err) => FileResult {
                                file: ParsedFile {
                                    path: path.clone(),
                                    ..ParsedFile::default()
                                },
                                errs: vec![Error::Io {
                                    path: path.clone(),
                                    source: std::io::Error::new(
                                        std::io::ErrorKind::InvalidData,
                                        err,
                                    ),
                                }],
                            },
                        },
                        Err(err) => FileResult {
                            file: ParsedFile {
                                path: path.clone(),
                                ..ParsedFile::default()
                            },
                            errs: vec![Error::Io {
                                path: path.clone(),
                                source: err,
                            }],
                        },
                    };
                    if result_tx.send((path, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut seen: HashSet<Utf8PathBuf> = HashSet::new();
        let mut outstanding = 0usize;
        for seed in &schedule {
            if seen.insert(seed.clone()) {
                job_tx.send(seed.clone()).expect("worker pool alive");
                outstanding += 1;
            }
        }

        let mut results: HashMap<Utf8PathBuf, FileResult> = HashMap::new();
        let mut next_flush = 0usize;
        while outstanding > 0 {
            let (path, result) = result_rx.recv().expect("worker pool alive");
            outstanding -= 1;
            trace!(%path, "parsed blueprint file");
            if follow_refs {
                // Start parsing discovered files immediately; their visit
                // slot is assigned later, when their parent flushes.
                for child in child_paths(&result.file, subfile_name) {
                    if seen.insert(child.clone()) {
                        job_tx.send(child).expect("worker pool alive");
                        outstanding += 1;
                    }
                }
            }
            results.insert(path, result);

            while next_flush < schedule.len() {
                let Some(result) = results.remove(&schedule[next_flush]) else {
                    break;
                };
                errs.extend(result.errs);
                visitor(&result.file);
                if follow_refs {
                    for child in child_paths(&result.file, subfile_name) {
                        if scheduled.insert(child.clone()) {
                            schedule.push(child);
                        }
                    }
                }
                next_flush += 1;
            }
        }
        drop(job_tx);
        debug!(files = schedule.len(), "blueprint walk complete");
    });

    (schedule, errs)
}
