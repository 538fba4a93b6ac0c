use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::api::vjob_dto::VJobDto;
use crate::domain::utils::id::VJobId;
use crate::error::{QueueError, Result};
use crate::loader::parser::{parse_json_file, write_json_file};

const QUEUED_DIR: &str = "queued";
const RUNNING_DIR: &str = "running";

#[derive(Debug)]
struct QueueState {
    root: PathBuf,
    next_seq: u64,
    /// FIFO order, by sequence number.
    queued: BTreeMap<u64, VJobDto>,
    running: BTreeMap<VJobId, VJobDto>,
}

/// Persistent queue of VJobs.
///
/// Every VJob is one JSON file: `queued/<seq>-<id>.json` while waiting,
/// `running/<id>.json` once its VMs were placed. The sequence number keeps
/// FIFO order across restarts. Clones share the same state.
#[derive(Debug, Clone)]
pub struct VJobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl VJobQueue {
    /// Opens the queue rooted at `root`, reloading the VJobs left by a
    /// previous run.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(QUEUED_DIR))?;
        fs::create_dir_all(root.join(RUNNING_DIR))?;

        let mut queued = BTreeMap::new();
        for path in json_files(&root.join(QUEUED_DIR))? {
            let Some((seq, stem_id)) = queued_entry_of(&path) else {
                log::warn!("Ignoring queued file without sequence number: {}", path.display());
                continue;
            };
            let mut dto = parse_json_file::<VJobDto>(&path)?;
            dto.id.get_or_insert(stem_id);
            queued.insert(seq, dto);
        }

        let mut running = BTreeMap::new();
        for path in json_files(&root.join(RUNNING_DIR))? {
            let dto = parse_json_file::<VJobDto>(&path)?;
            let id = dto.id.clone().or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned())).unwrap_or_default();
            running.insert(VJobId::new(id), dto);
        }

        let next_seq = queued.keys().next_back().map(|s| s + 1).unwrap_or(0);
        log::info!("VJob queue opened at {}: {} queued, {} running", root.display(), queued.len(), running.len());

        Ok(VJobQueue { state: Arc::new(Mutex::new(QueueState { root, next_seq, queued, running })) })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a VJob, assigning it an id when it has none. The id ends up
    /// in file names, so it must be a plain name unknown to the queue.
    pub fn submit(&self, mut dto: VJobDto) -> Result<VJobId> {
        let id = dto.id.get_or_insert_with(|| Uuid::new_v4().to_string()).clone();
        validate_id(&id)?;

        let mut state = self.lock();
        let vjob_id = VJobId::new(id.clone());
        if find_queued(&state, &vjob_id).is_some() || state.running.contains_key(&vjob_id) {
            return Err(QueueError::Duplicate(vjob_id).into());
        }
        let seq = state.next_seq;
        write_json_file(queued_path(&state.root, seq, &id), &dto)?;
        state.next_seq += 1;
        state.queued.insert(seq, dto);

        log::info!("VJob {} queued at position {}", id, state.queued.len());
        Ok(vjob_id)
    }

    /// Queued VJobs, oldest first.
    pub fn queued(&self) -> Vec<VJobDto> {
        self.lock().queued.values().cloned().collect()
    }

    pub fn running(&self) -> Vec<VJobDto> {
        self.lock().running.values().cloned().collect()
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queued.len()
    }

    pub fn running_len(&self) -> usize {
        self.lock().running.len()
    }

    /// Moves a queued VJob to the running set. Returns `false` if it was not
    /// queued.
    pub fn mark_running(&self, id: &VJobId) -> Result<bool> {
        let mut state = self.lock();
        let Some(seq) = find_queued(&state, id) else {
            return Ok(false);
        };

        let root = state.root.clone();
        if let Some(dto) = state.queued.remove(&seq) {
            write_json_file(root.join(RUNNING_DIR).join(format!("{}.json", id)), &dto)?;
            remove_if_exists(&queued_path(&root, seq, id.as_str()))?;
            state.running.insert(id.clone(), dto);
        }
        log::info!("VJob {} is running", id);
        Ok(true)
    }

    /// Drops a queued VJob that can never be planned.
    pub fn reject(&self, id: &VJobId, reason: &str) -> Result<bool> {
        let mut state = self.lock();
        let Some(seq) = find_queued(&state, id) else {
            return Ok(false);
        };

        state.queued.remove(&seq);
        remove_if_exists(&queued_path(&state.root, seq, id.as_str()))?;
        log::error!("VJob {} rejected: {}", id, reason);
        Ok(true)
    }

    /// Forgets a running VJob whose VMs are gone.
    pub fn complete(&self, id: &VJobId) -> Result<bool> {
        let mut state = self.lock();
        if state.running.remove(id).is_none() {
            return Ok(false);
        }
        remove_if_exists(&state.root.join(RUNNING_DIR).join(format!("{}.json", id)))?;
        log::info!("VJob {} completed", id);
        Ok(true)
    }
}

fn find_queued(state: &QueueState, id: &VJobId) -> Option<u64> {
    state.queued.iter().find(|(_, dto)| dto.id.as_deref() == Some(id.as_str())).map(|(seq, _)| *seq)
}

fn queued_path(root: &Path, seq: u64, id: &str) -> PathBuf {
    root.join(QUEUED_DIR).join(format!("{:010}-{}.json", seq, id))
}

/// Sequence number and id encoded in a `<seq>-<id>.json` file name.
fn queued_entry_of(path: &Path) -> Option<(u64, String)> {
    let stem = path.file_stem()?.to_str()?;
    let (seq, id) = stem.split_once('-')?;
    Some((seq.parse().ok()?, id.to_string()))
}

fn validate_id(id: &str) -> std::result::Result<(), QueueError> {
    let reason = if id.is_empty() {
        "empty"
    } else if id.contains(['/', '\\']) {
        "contains a path separator"
    } else if id.contains("..") {
        "contains '..'"
    } else {
        return Ok(());
    };
    Err(QueueError::InvalidId { id: id.to_string(), reason: reason.to_string() })
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
