//! Integration test: record a corrective session to disk, then replay it
//! through the engine and get the identical click sequence back.

#![allow(clippy::unwrap_used)]

use clicksim_engine::{ClickEngine, ClickRecord, ClickSession, ClickStrategy, LabelMap, Sample};
use clicksim_replay::ReplayDir;
use ndarray::{ArrayD, Dimension, IxDyn};
use rand::SeedableRng;
use rand::rngs::StdRng;

const ROUNDS: usize = 4;

fn blob_label() -> ArrayD<f32> {
    ArrayD::from_shape_fn(IxDyn(&[1, 12, 12, 6]), |idx| {
        let i = idx.slice();
        if (3..9).contains(&i[1]) && (2..10).contains(&i[2]) && (1..5).contains(&i[3]) {
            1.0
        } else {
            0.0
        }
    })
}

#[test]
fn recorded_session_replays_identically() {
    let labels = LabelMap::from_names(["background", "lesion"]).unwrap();
    let label = blob_label();
    // The prediction finds only the far half of the lesion.
    let mut prediction = label.clone();
    for x in 3..6 {
        for y in 0..12 {
            for z in 0..6 {
                prediction[[0, x, y, z]] = 0.0;
            }
        }
    }
    let sample = Sample::new("case_007.nii.gz", label.view(), prediction.view(), &labels);

    let mut recorded = ClickSession::new(3);
    let mut rng = StdRng::seed_from_u64(2024);
    let engine = ClickEngine::new();
    for _ in 0..ROUNDS {
        engine
            .add_clicks(&ClickStrategy::GlobalCorrective, &sample, &mut recorded, &mut rng)
            .unwrap();
    }
    assert_eq!(recorded.clicks("lesion").len(), ROUNDS);

    let dir = tempfile::tempdir().unwrap();
    let replay = ReplayDir::new(dir.path());
    let record = ClickRecord::from_session(&recorded, &labels);
    // Background never had a discrepancy, yet it is still recorded.
    assert_eq!(record.get("background"), Some(&[][..]));
    let path = replay.write(sample.id, &record).unwrap();
    assert!(path.ends_with("case_007_clicks.json"));

    let replayer = ClickEngine::new().with_record_source(Box::new(replay));
    let mut replayed = ClickSession::new(3);
    for _ in 0..ROUNDS {
        replayer
            .add_clicks(&ClickStrategy::ReplayFromFile, &sample, &mut replayed, &mut rng)
            .unwrap();
    }

    assert_eq!(
        replayed.clicks("lesion").coordinates(),
        recorded.clicks("lesion").coordinates()
    );
    assert!(replayed.clicks("background").is_empty());
}
