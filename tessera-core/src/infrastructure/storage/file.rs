use super::SignStateStore;
use crate::domain::SignState;
use crate::foundation::{ChainId, Result, SignerError};
use crate::storage_err;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One JSON state file per chain id, replaced atomically on every commit:
/// write to a temp file in the same directory, fsync it, rename over the
/// target, fsync the directory.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| storage_err!("create state dir", err))?;
        Ok(Self { dir })
    }

    fn state_path(&self, chain_id: &ChainId) -> PathBuf {
        self.dir.join(format!("{}_sign_state.json", sanitize(chain_id.as_str())))
    }
}

fn sanitize(chain_id: &str) -> String {
    chain_id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' }).collect()
}

fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

impl SignStateStore for FileStateStore {
    fn load(&self, chain_id: &ChainId) -> Result<Option<SignState>> {
        let path = self.state_path(chain_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(storage_err!("read sign state", err)),
        };
        let state: SignState = serde_json::from_slice(&bytes)
            .map_err(|err| SignerError::storage("parse sign state", format!("{}: {}", path.display(), err)))?;
        Ok(Some(state))
    }

    fn commit(&self, chain_id: &ChainId, state: &SignState) -> Result<()> {
        let path = self.state_path(chain_id);
        let tmp = path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(state)?;
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)
                .map_err(|err| storage_err!("open tmp sign state", err))?;
            file.write_all(&bytes).map_err(|err| storage_err!("write sign state", err))?;
            file.sync_all().map_err(|err| storage_err!("fsync sign state", err))?;
        }
        fs::rename(&tmp, &path).map_err(|err| storage_err!("replace sign state", err))?;
        fsync_dir(&self.dir).map_err(|err| storage_err!("fsync state dir", err))?;

        debug!(
            "committed sign state chain_id={} height={} round={} step={}",
            chain_id, state.height, state.round, state.step
        );
        Ok(())
    }
}
