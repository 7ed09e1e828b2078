use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::NaiveDate;
use serde_json::{Value, json};

use callisto_mapillary::app::{AssetAction, App};
use callisto_mapillary::domain::{
    AccountId, Coordinate, Encoding, ImageKey, TimeRange, Username,
};
use callisto_mapillary::error::{
    DownloadError, FetchError, MergeError, PersistError, RemoteError, ResolutionError,
};
use callisto_mapillary::mapillary::MapillaryClient;
use callisto_mapillary::store::Store;

const GPX: &str = "<?xml version=\"1.0\"?><gpx><trk><trkseg></trkseg></trk></gpx>";

#[derive(Default)]
struct MockMapillary {
    users: HashMap<String, Value>,
    sequences: Option<String>,
    failing_images: HashSet<String>,
    user_calls: Mutex<usize>,
    sequence_calls: Mutex<Vec<(Encoding, TimeRange)>>,
    image_calls: Mutex<usize>,
}

impl MockMapillary {
    fn with_user(mut self, username: &str, key: &str) -> Self {
        self.users.insert(
            username.to_string(),
            json!([{"key": key, "username": username, "about": "", "created_at": "2015-01-01"}]),
        );
        self
    }

    fn with_sequences(self, document: Value) -> Self {
        self.with_raw_sequences(&document.to_string())
    }

    fn with_raw_sequences(mut self, body: &str) -> Self {
        self.sequences = Some(body.to_string());
        self
    }

    fn user_calls(&self) -> usize {
        *self.user_calls.lock().unwrap()
    }

    fn sequence_calls(&self) -> Vec<(Encoding, TimeRange)> {
        self.sequence_calls.lock().unwrap().clone()
    }

    fn image_calls(&self) -> usize {
        *self.image_calls.lock().unwrap()
    }
}

impl MapillaryClient for MockMapillary {
    fn search_users(&self, username: &Username) -> Result<Value, RemoteError> {
        *self.user_calls.lock().unwrap() += 1;
        match username.as_str() {
            "timeout" => Err(RemoteError::Timeout),
            "broken" => Err(RemoteError::Status {
                status: 500,
                message: "internal error".to_string(),
            }),
            name => Ok(self.users.get(name).cloned().unwrap_or_else(|| json!([]))),
        }
    }

    fn list_sequences(
        &self,
        _account: &AccountId,
        encoding: Encoding,
        window: &TimeRange,
    ) -> Result<String, RemoteError> {
        self.sequence_calls.lock().unwrap().push((encoding, *window));
        match encoding {
            Encoding::TrackLog => Ok(GPX.to_string()),
            Encoding::Structured => self.sequences.clone().ok_or(RemoteError::Timeout),
        }
    }

    fn fetch_thumbnail(&self, key: &ImageKey) -> Result<Vec<u8>, RemoteError> {
        *self.image_calls.lock().unwrap() += 1;
        if self.failing_images.contains(key.as_str()) {
            return Err(RemoteError::Status {
                status: 404,
                message: "not found".to_string(),
            });
        }
        Ok(format!("jpeg:{key}").into_bytes())
    }
}

fn feature(keys: &[&str], coords: &[[f64; 2]]) -> Value {
    json!({
        "type": "Feature",
        "properties": {"coordinateProperties": {"image_keys": keys}},
        "geometry": {"type": "LineString", "coordinates": coords}
    })
}

fn collection(features: Vec<Value>) -> Value {
    json!({"type": "FeatureCollection", "features": features})
}

fn temp_store(temp: &tempfile::TempDir) -> Store {
    let output_dir = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    let image_dir = Utf8PathBuf::from_path_buf(temp.path().join("images")).unwrap();
    Store::new_with_paths(output_dir, image_dir)
}

fn window(start: (i32, u32, u32), end: (i32, u32, u32)) -> TimeRange {
    TimeRange::new(
        NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
        NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
    )
    .unwrap()
}

#[test]
fn resolve_is_memoized() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = App::new(
        temp_store(&temp),
        MockMapillary::default().with_user("dandrimont", "uk-1"),
    );

    let first = app.resolve_username("dandrimont").unwrap().clone();
    let second = app.resolve_username("dandrimont").unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(first.key.as_str(), "uk-1");
    assert_eq!(first.profile["created_at"], "2015-01-01");
    assert_eq!(app.account_id("dandrimont").unwrap().as_str(), "uk-1");
    assert_eq!(app.client().user_calls(), 1);
}

#[test]
fn username_list_uses_first_entry() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockMapillary::default().with_user("dandrimont", "uk-1");
    let mut app = App::new(temp_store(&temp), client);

    let key = app.account_id("dandrimont,other").unwrap();
    assert_eq!(key.as_str(), "uk-1");
    let username: Username = "dandrimont".parse().unwrap();
    assert!(app.cache().account(&username).is_some());
}

#[test]
fn empty_search_result_is_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = App::new(temp_store(&temp), MockMapillary::default());

    let err = app.resolve_username("nobody").unwrap_err();
    assert_matches!(err, ResolutionError::NotFound(name) if name == "nobody");
}

#[test]
fn remote_failures_are_reported() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = App::new(temp_store(&temp), MockMapillary::default());

    assert_matches!(
        app.resolve_username("timeout"),
        Err(ResolutionError::Remote(RemoteError::Timeout))
    );
    assert_matches!(
        app.resolve_username("broken"),
        Err(ResolutionError::Remote(RemoteError::Status { status: 500, .. }))
    );
}

#[test]
fn first_fetch_wins_for_each_encoding() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockMapillary::default()
        .with_user("dandrimont", "uk-1")
        .with_sequences(collection(vec![feature(&["a"], &[[1.0, 1.0]])]));
    let mut app = App::new(temp_store(&temp), client);

    let first_window = window((2018, 1, 1), (2018, 12, 31));
    let first = app
        .fetch_sequences("dandrimont", Encoding::Structured, &first_window)
        .unwrap()
        .clone();
    let later = app
        .fetch_sequences(
            "dandrimont",
            Encoding::Structured,
            &window((2019, 1, 1), (2019, 12, 31)),
        )
        .unwrap()
        .clone();
    assert_eq!(first, later);

    app.fetch_sequences("dandrimont", Encoding::TrackLog, &TimeRange::default())
        .unwrap();

    let merged = app.merge_trajectory("dandrimont").unwrap();
    assert_eq!(merged.image_keys, vec!["a"]);

    assert_eq!(
        app.client().sequence_calls(),
        vec![
            (Encoding::Structured, first_window),
            (Encoding::TrackLog, TimeRange::default())
        ]
    );
}

#[test]
fn fetch_propagates_resolution_failure() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = App::new(temp_store(&temp), MockMapillary::default());

    let err = app
        .fetch_sequences("nobody", Encoding::Structured, &TimeRange::default())
        .unwrap_err();
    assert_matches!(err, FetchError::Resolution(ResolutionError::NotFound(_)));
    assert!(app.client().sequence_calls().is_empty());
}

#[test]
fn malformed_sequences_are_not_cached() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockMapillary::default()
        .with_user("dandrimont", "uk-1")
        .with_sequences(json!({"features": [{"properties": {}}]}));
    let mut app = App::new(temp_store(&temp), client);

    let err = app
        .fetch_sequences("dandrimont", Encoding::Structured, &TimeRange::default())
        .unwrap_err();
    assert_matches!(err, FetchError::Malformed(_));
    assert!(
        app.cache()
            .sequences(&AccountId::new("uk-1"), Encoding::Structured)
            .is_none()
    );
}

#[test]
fn merge_repairs_duplicated_coordinate() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockMapillary::default()
        .with_user("dandrimont", "uk-1")
        .with_sequences(collection(vec![
            feature(&["a", "b"], &[[1.0, 2.0], [3.0, 4.0]]),
            feature(&["c"], &[[5.0, 6.0], [5.0, 6.0]]),
        ]));
    let mut app = App::new(temp_store(&temp), client);

    let merged = app.merge_trajectory("dandrimont").unwrap();
    assert_eq!(merged.image_keys, vec!["a", "b", "c"]);
    assert_eq!(
        merged.coordinates,
        vec![
            Coordinate::new(1.0, 2.0),
            Coordinate::new(3.0, 4.0),
            Coordinate::new(5.0, 6.0)
        ]
    );
    assert_eq!(app.client().user_calls(), 1);
    assert_eq!(
        app.client().sequence_calls(),
        vec![(Encoding::Structured, TimeRange::default())]
    );

    let again = app.merge_trajectory("dandrimont").unwrap();
    assert_eq!(again, merged);
    assert_eq!(app.client().sequence_calls().len(), 1);
}

#[test]
fn merge_rejects_distinct_coordinates() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockMapillary::default()
        .with_user("dandrimont", "uk-1")
        .with_sequences(collection(vec![feature(&["a"], &[[1.0, 2.0], [3.0, 4.0]])]));
    let mut app = App::new(temp_store(&temp), client);

    assert_matches!(
        app.merge_trajectory("dandrimont"),
        Err(MergeError::Inconsistent {
            index: 0,
            image_keys: 1,
            coordinates: 2
        })
    );
}

#[test]
fn merge_reports_fetch_failure() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockMapillary::default().with_user("dandrimont", "uk-1");
    let mut app = App::new(temp_store(&temp), client);

    assert_matches!(
        app.merge_trajectory("dandrimont"),
        Err(MergeError::FetchFailed(FetchError::Remote(RemoteError::Timeout)))
    );
}

#[test]
fn persist_writes_payload_verbatim() {
    let temp = tempfile::tempdir().unwrap();
    let body = r#"{"type": "FeatureCollection", "features": [
  {"type": "Feature", "properties": {"key": "s1", "coordinateProperties": {"image_keys": ["a"]}},
   "geometry": {"type": "LineString", "coordinates": [[1.0, 2.0]]}}
]}"#;
    let client = MockMapillary::default()
        .with_user("dandrimont", "uk-1")
        .with_raw_sequences(body);
    let mut app = App::new(temp_store(&temp), client);

    let json_path = app
        .persist_sequences("dandrimont", Encoding::Structured)
        .unwrap();
    assert!(json_path.ends_with("dandrimont_sequences.json"));
    assert_eq!(std::fs::read_to_string(json_path.as_std_path()).unwrap(), body);

    let gpx_path = app
        .persist_sequences("dandrimont", Encoding::TrackLog)
        .unwrap();
    assert!(gpx_path.ends_with("dandrimont_sequences.gpx"));
    assert_eq!(std::fs::read_to_string(gpx_path.as_std_path()).unwrap(), GPX);
}

#[test]
fn positions_with_extra_components_are_merged() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockMapillary::default()
        .with_user("dandrimont", "uk-1")
        .with_raw_sequences(
            r#"{"features": [{"properties": {"coordinateProperties": {"image_keys": ["a"]}},
                "geometry": {"coordinates": [[1.0, 2.0, 3.0, 4.0]]}}]}"#,
        );
    let mut app = App::new(temp_store(&temp), client);

    let merged = app.merge_trajectory("dandrimont").unwrap();
    assert_eq!(merged.image_keys, vec!["a"]);
    assert_eq!(merged.coordinates[0].alt, Some(3.0));
    assert_eq!(merged.coordinates[0].extra, vec![4.0]);
}

#[test]
fn persist_aborts_when_fetch_fails() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let output_dir = store.output_dir().to_owned();
    let mut app = App::new(store, MockMapillary::default());

    assert_matches!(
        app.persist_sequences("nobody", Encoding::Structured),
        Err(PersistError::Fetch(FetchError::Resolution(
            ResolutionError::NotFound(_)
        )))
    );
    assert!(!output_dir.as_std_path().exists());
}

#[test]
fn assets_are_downloaded_once() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(temp_store(&temp), MockMapillary::default());
    let keys = vec!["img_1".to_string(), "img-2".to_string()];

    let report = app.fetch_assets(&keys).unwrap();
    assert_eq!(report.count(AssetAction::Downloaded), 2);
    assert_eq!(app.client().image_calls(), 2);

    let path = app
        .store()
        .thumbnail_path(&"img_1".parse::<ImageKey>().unwrap());
    assert_eq!(std::fs::read(path.as_std_path()).unwrap(), b"jpeg:img_1");

    let report = app.fetch_assets(&keys).unwrap();
    assert_eq!(report.count(AssetAction::Skipped), 2);
    assert_eq!(app.client().image_calls(), 2);
}

#[test]
fn asset_failures_do_not_stop_other_keys() {
    let temp = tempfile::tempdir().unwrap();
    let mut client = MockMapillary::default();
    client.failing_images.insert("gone".to_string());
    let app = App::new(temp_store(&temp), client);
    let keys = vec![
        "gone".to_string(),
        "../escape".to_string(),
        "kept".to_string(),
    ];

    let report = app.fetch_assets(&keys).unwrap();
    let actions: Vec<_> = report.items.iter().map(|item| item.action).collect();
    assert_eq!(
        actions,
        vec![AssetAction::Failed, AssetAction::Failed, AssetAction::Downloaded]
    );
    assert!(report.items[0].error.as_deref().unwrap().contains("404"));
    assert_eq!(app.client().image_calls(), 2);

    let gone = app
        .store()
        .thumbnail_path(&"gone".parse::<ImageKey>().unwrap());
    assert!(!gone.as_std_path().exists());
}

#[test]
fn empty_key_list_is_a_no_op() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(temp_store(&temp), MockMapillary::default());

    let report = app.fetch_assets(&[]).unwrap();
    assert!(report.items.is_empty());
    assert!(!app.store().image_dir().as_std_path().exists());
}

#[test]
fn trajectory_images_respect_limit() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockMapillary::default()
        .with_user("dandrimont", "uk-1")
        .with_sequences(collection(vec![feature(
            &["a", "b", "c"],
            &[[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]],
        )]));
    let mut app = App::new(temp_store(&temp), client);

    let report = app.download_trajectory_images("dandrimont", Some(2)).unwrap();
    let keys: Vec<_> = report.items.iter().map(|item| item.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b"]);

    let report = app.download_trajectory_images("dandrimont", None).unwrap();
    assert_eq!(report.count(AssetAction::Skipped), 2);
    assert_eq!(report.count(AssetAction::Downloaded), 1);
}

#[test]
fn trajectory_images_surface_merge_errors() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = App::new(temp_store(&temp), MockMapillary::default());

    assert_matches!(
        app.download_trajectory_images("nobody", Some(5)),
        Err(DownloadError::Merge(MergeError::FetchFailed(_)))
    );
}
