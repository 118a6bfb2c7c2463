//! Directory-backed record source.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use clicksim_engine::{ClickError, ClickRecord, ClickRecordSource};
use log::debug;

use crate::format::{ReplayError, parse_record, record_file_name, to_json};

/// Click records stored as one JSON file per sample in a directory.
///
/// Every lookup opens, reads, and closes a single file; no handle
/// outlives the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayDir {
    root: PathBuf,
}

impl ReplayDir {
    /// Use `root` as the record directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The record directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record file for `sample`.
    #[must_use]
    pub fn path_for(&self, sample: &str) -> PathBuf {
        self.root.join(record_file_name(sample))
    }

    /// Read the record for `sample`, or `None` if no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::Io`] if the file exists but cannot be read,
    /// and any parse error of [`parse_record`].
    pub fn read(&self, sample: &str) -> Result<Option<ClickRecord>, ReplayError> {
        let path = self.path_for(sample);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no click record at {}", path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(ReplayError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        let record = parse_record(&text)?;
        debug!("loaded click record {} ({} labels)", path.display(), record.labels().count());
        Ok(Some(record))
    }

    /// Write `record` as the file for `sample`, returning its path.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::Io`] if the file cannot be written.
    pub fn write(&self, sample: &str, record: &ClickRecord) -> Result<PathBuf, ReplayError> {
        let path = self.path_for(sample);
        let json = to_json(record)?;
        fs::write(&path, json).map_err(|source| ReplayError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!("wrote click record {}", path.display());
        Ok(path)
    }
}

impl ClickRecordSource for ReplayDir {
    fn load(&self, sample: &str) -> Result<Option<ClickRecord>, ClickError> {
        self.read(sample).map_err(|e| ClickError::InvalidRecord {
            sample: sample.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clicksim_engine::{ClickEngine, ClickSession, ClickStrategy, Coordinate, LabelMap, LabelOutcome, Sample};
    use ndarray::{ArrayD, IxDyn};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let replay = ReplayDir::new(dir.path());
        assert!(replay.read("case_404.nii.gz").unwrap().is_none());
        assert!(replay.load("case_404.nii.gz").unwrap().is_none());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let replay = ReplayDir::new(dir.path());
        let mut record = ClickRecord::new();
        record.insert("liver", vec![vec![1, 2, 3]]);

        let path = replay.write("case_001.nii.gz", &record).unwrap();
        assert_eq!(path, dir.path().join("case_001_clicks.json"));
        assert_eq!(replay.read("case_001.nii.gz").unwrap(), Some(record));
    }

    #[test]
    fn corrupt_file_is_invalid_record() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("case_002_clicks.json"), "{ nope").unwrap();
        let replay = ReplayDir::new(dir.path());
        assert!(matches!(
            replay.load("case_002.nii.gz"),
            Err(ClickError::InvalidRecord { ref sample, .. }) if sample == "case_002.nii.gz"
        ));
    }

    #[test]
    fn engine_replays_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("case_003_clicks.json"),
            r#"{"background": [[0, 0]], "lesion": [[2, 3], [4, 1]]}"#,
        )
        .unwrap();

        let engine = ClickEngine::new().with_record_source(Box::new(ReplayDir::new(dir.path())));
        let labels = LabelMap::from_names(["background", "lesion"]).unwrap();
        let volume = ArrayD::<f32>::zeros(IxDyn(&[1, 6, 6]));
        let sample = Sample::new("case_003.nii.gz", volume.view(), volume.view(), &labels);
        let mut session = ClickSession::new(2);
        let mut rng = StdRng::seed_from_u64(0);

        for _ in 0..2 {
            engine
                .add_clicks(&ClickStrategy::ReplayFromFile, &sample, &mut session, &mut rng)
                .unwrap();
        }
        assert_eq!(
            session.clicks("lesion").coordinates(),
            &[Coordinate::new(vec![0, 2, 3]), Coordinate::new(vec![0, 4, 1])]
        );
        let report = engine
            .add_clicks(&ClickStrategy::ReplayFromFile, &sample, &mut session, &mut rng)
            .unwrap();
        assert_eq!(
            report.outcome("lesion"),
            Some(&LabelOutcome::Replayed { appended: 0, total: 2 })
        );
    }

    #[test]
    fn engine_reports_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ClickEngine::new().with_record_source(Box::new(ReplayDir::new(dir.path())));
        let labels = LabelMap::from_names(["background", "lesion"]).unwrap();
        let volume = ArrayD::<f32>::zeros(IxDyn(&[1, 6, 6]));
        let sample = Sample::new("case_004.nii.gz", volume.view(), volume.view(), &labels);
        let result = engine.add_clicks(
            &ClickStrategy::ReplayFromFile,
            &sample,
            &mut ClickSession::new(2),
            &mut StdRng::seed_from_u64(0),
        );
        assert!(matches!(result, Err(ClickError::MissingRecordedClicks { .. })));
    }
}
