use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::tempdir;

use hapistream::format::{write_stream, OutputFormat};
use hapistream::record::{ProjectedStream, RecordStream};
use hapistream::source::{AggregatingStream, FileSource, FileSourceConfig, RecordSource};
use hapistream::time::TimeRange;
use hapistream::Schema;

const HEADER: &str = "\
FILE_NAME = \"fgm.cef\"
START_VARIABLE = time_tags
  VALUE_TYPE = ISO_TIME
END_VARIABLE = time_tags
START_VARIABLE = B_xyz
  SIZES = 3
  VALUE_TYPE = FLOAT
  FILLVAL = -1.0E31
END_VARIABLE = B_xyz
START_VARIABLE = mode
  VALUE_TYPE = CHAR
END_VARIABLE = mode
DATA_UNTIL = EOF
";

fn granule(records: &[&str]) -> String {
    let mut text = HEADER.to_string();
    for record in records {
        text.push_str(record);
        text.push('\n');
    }
    text
}

fn write_plain(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
    fs::write(path, text).expect("write granule");
}

fn write_gz(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
    let file = File::create(path).expect("create gz");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(text.as_bytes()).expect("write gz");
    encoder.finish().expect("finish gz");
}

fn source_for(root: &Path) -> FileSource {
    let config: FileSourceConfig = serde_json::from_str(&format!(
        r#"{{"root": {:?}, "template": "$Y/fgm_$Y$m$d.cef", "cadence": "day"}}"#,
        root.display().to_string()
    ))
    .expect("source config");
    FileSource::new(config).expect("file source")
}

#[test]
fn aggregates_days_in_order_and_skips_missing_granules() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    write_plain(
        &root.join("2002/fgm_20020221.cef"),
        &granule(&[
            "2002-02-21T00:00:00.000Z, 1.0, 2.0, 3.0, \"normal\"",
            "2002-02-21T12:00:00.000Z, 4.0, 5.0, 6.0, \"burst, high\"",
        ]),
    );
    // 2002-02-22 has no file.
    write_gz(
        &root.join("2002/fgm_20020223.cef.gz"),
        &granule(&["2002-02-23T06:30:00.000Z, -1.5, 0.0, 2.25, \"normal\""]),
    );
    write_plain(&root.join("2002/fgm_20020224.cef"), &granule(&[]));

    let mut source = source_for(root);
    assert!(source.has_granule_iterator());
    assert!(!source.has_param_subset_iterator());

    let range = TimeRange::parse_iso("2002-02-21", "2002-02-25").expect("range");
    let mut stream = AggregatingStream::new(&mut source, &range, None).expect("aggregate");

    let mut times = Vec::new();
    while stream.has_next() {
        let record = stream.next_record().expect("record");
        assert_eq!(record.len(), 3);
        times.push(record.iso_time(0).expect("time").into_owned());
    }
    stream.close().expect("close");
    assert_eq!(
        times,
        vec![
            "2002-02-21T00:00:00.000Z",
            "2002-02-21T12:00:00.000Z",
            "2002-02-23T06:30:00.000Z",
        ]
    );
}

#[test]
fn aggregated_stream_serializes_as_csv() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    write_plain(
        &root.join("2002/fgm_20020221.cef"),
        &granule(&["2002-02-21T00:00:00.000Z, 1.0, 2.0, 3.0, \"burst, high\""]),
    );
    write_gz(
        &root.join("2002/fgm_20020222.cef.gz"),
        &granule(&["2002-02-22T00:00:00.000Z, 7.0, 8.0, 9.5, normal"]),
    );

    let schema: Schema = {
        let path = root.join("2002/fgm_20020221.cef");
        let input = hapistream::source::open_input(&path).expect("open");
        hapistream::parse::cef::CefStream::new(input)
            .expect("header")
            .schema()
    };
    assert_eq!(schema.names(), vec!["time_tags", "B_xyz", "mode"]);
    assert_eq!(schema.parameters[1].size, Some(vec![3]));
    assert_eq!(schema.parameters[1].fill_value().expect("fill"), Some(-1.0e31));

    let mut source = source_for(root);
    let range = TimeRange::parse_iso("2002-02-21", "2002-02-23").expect("range");
    let stream = AggregatingStream::new(&mut source, &range, None).expect("aggregate");
    let wanted = vec!["mode".to_string(), "time_tags".to_string()];
    let mut projected =
        ProjectedStream::by_name(stream, &schema.names(), &wanted).expect("projection");
    let subset = schema.subset(&wanted).expect("subset");

    let mut out = Vec::new();
    let written = write_stream(&mut projected, &subset, OutputFormat::Csv, &mut out)
        .expect("write csv");
    assert_eq!(written, 2);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(out.as_slice());
    let rows: Vec<csv::StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .expect("read csv");
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][0], "burst, high");
    assert_eq!(&rows[0][1], "2002-02-21T00:00:00.000Z");
    assert_eq!(&rows[1][0], "normal");
    assert_eq!(&rows[1][1], "2002-02-22T00:00:00.000Z");
}

#[test]
fn range_with_no_files_is_empty() {
    let dir = tempdir().expect("tempdir");
    let mut source = source_for(dir.path());
    let range = TimeRange::parse_iso("2010-01-01", "2010-01-04").expect("range");
    let stream = AggregatingStream::new(&mut source, &range, None).expect("aggregate");
    assert!(!stream.has_next());
}
