use std::fs;

use tempfile::tempdir;

use hapistream::format::{BinaryFormatter, CsvFormatter, DataFormatter};
use hapistream::parse::cef::CefStream;
use hapistream::record::RecordStream;
use hapistream::source::open_input;
use hapistream::{Error, Schema};

#[test]
fn mismatched_variable_block_is_rejected() {
    let text = "\
START_VARIABLE = X
  VALUE_TYPE = FLOAT
END_VARIABLE = Y
DATA_UNTIL = EOF
1.0
";
    let result = CefStream::new(text.as_bytes());
    assert!(matches!(result, Err(Error::MalformedHeader(_))));
}

#[test]
fn sizes_are_reversed_into_a_flat_span() {
    let text = "\
START_VARIABLE = epoch
  VALUE_TYPE = ISO_TIME
END_VARIABLE = epoch
START_VARIABLE = matrix
  SIZES = 3, 2
  VALUE_TYPE = INT
END_VARIABLE = matrix
START_VARIABLE = label
  VALUE_TYPE = CHAR
  DATA = \"static\"
END_VARIABLE = label
DATA_UNTIL = EOF
2005-03-01T00:00:00.000Z, 1, 2, 3, 4, 5, 6
";
    let mut stream = CefStream::new(text.as_bytes()).expect("header");
    let matrix = stream.header().parameter("matrix").expect("matrix");
    assert_eq!(matrix.sizes, vec![2, 3]);
    assert_eq!(matrix.span, Some(1..7));
    assert_eq!(stream.header().width, 7);

    let schema = stream.schema();
    assert_eq!(schema.parameters[1].size, Some(vec![2, 3]));

    let record = stream.next_record().expect("record");
    assert_eq!(record.integer_array(1).expect("matrix"), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(record.string(2).expect("label"), "static");
    assert!(!stream.has_next());
}

#[test]
fn custom_end_of_record_marker_joins_lines() {
    let text = "\
END_OF_RECORD_MARKER = \"$\"
START_VARIABLE = t
  VALUE_TYPE = ISO_TIME
END_VARIABLE = t
START_VARIABLE = v
  SIZES = 2
  VALUE_TYPE = DOUBLE
END_VARIABLE = v
DATA_UNTIL = EOF
2005-03-01T00:00:00.000Z,
  1.5, 2.5 $
2005-03-01T00:00:01.000Z, 3.5, 4.5 $
";
    let mut stream = CefStream::new(text.as_bytes()).expect("header");
    assert_eq!(stream.header().end_of_record, b'$');

    let record = stream.next_record().expect("first");
    assert_eq!(record.double_array(1).expect("v"), vec![1.5, 2.5]);
    let record = stream.next_record().expect("second");
    assert_eq!(record.iso_time(0).expect("t"), "2005-03-01T00:00:01.000Z");
    assert!(!stream.has_next());
}

#[test]
fn gzip_file_reads_like_plain() {
    let dir = tempdir().expect("tempdir");
    let text = "\
START_VARIABLE = t
  VALUE_TYPE = ISO_TIME
END_VARIABLE = t
DATA_UNTIL = EOF
2005-03-01T00:00:00.000Z
2005-03-01T00:00:01.000Z
";
    let plain = dir.path().join("sample.cef");
    fs::write(&plain, text).expect("write plain");

    let gz = dir.path().join("sample.cef.gz");
    let file = fs::File::create(&gz).expect("create gz");
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    std::io::Write::write_all(&mut encoder, text.as_bytes()).expect("write gz");
    encoder.finish().expect("finish gz");

    for path in [&plain, &gz] {
        let mut stream = CefStream::new(open_input(path).expect("open")).expect("header");
        let mut count = 0;
        while stream.has_next() {
            stream.next_record().expect("record");
            count += 1;
        }
        assert_eq!(count, 2, "{}", path.display());
    }
}

#[test]
fn vector_parameter_cannot_be_written_as_a_scalar() {
    let text = "\
START_VARIABLE = v
  SIZES = 3
  VALUE_TYPE = DOUBLE
END_VARIABLE = v
DATA_UNTIL = EOF
1.5, 2.5, 3.5
";
    let mut stream = CefStream::new(text.as_bytes()).expect("header");
    let record = stream.next_record().expect("record");
    let scalar = Schema::from_json_str(r#"{"parameters": [{"name": "v", "type": "double"}]}"#)
        .expect("schema");
    assert!(matches!(
        BinaryFormatter::new(&scalar, record),
        Err(Error::SchemaValidation(_))
    ));
    assert!(matches!(
        CsvFormatter::new(&scalar, record),
        Err(Error::SchemaValidation(_))
    ));

    let sized = Schema::from_json_str(
        r#"{"parameters": [{"name": "v", "type": "double", "size": [3]}]}"#,
    )
    .expect("schema");
    let mut formatter = BinaryFormatter::new(&sized, record).expect("binary plan");
    let mut out = Vec::new();
    formatter.write_record(&mut out, record).expect("write");
    assert_eq!(out.len(), 24);
}

#[test]
fn date_line_without_data_until_starts_the_data() {
    let text = "\
START_VARIABLE = t
  VALUE_TYPE = ISO_TIME
END_VARIABLE = t
START_VARIABLE = n
  VALUE_TYPE = INT
END_VARIABLE = n
2005-03-01T00:00:00.000Z, 1
2005-03-01T00:00:01.000Z, 2
";
    let mut stream = CefStream::new(text.as_bytes()).expect("header");
    assert_eq!(stream.header().data_until, None);

    let record = stream.next_record().expect("first");
    assert_eq!(record.iso_time(0).expect("t"), "2005-03-01T00:00:00.000Z");
    assert_eq!(record.integer(1).expect("n"), 1);
    let record = stream.next_record().expect("second");
    assert_eq!(record.integer(1).expect("n"), 2);
    assert!(!stream.has_next());
}

#[test]
fn backslash_continues_a_header_record() {
    let text = "\
START_VARIABLE = m\\
atrix
  SIZES = 2, \\
3
  VALUE_TYPE = INT
END_VARIABLE = matrix
DATA_UNTIL = EOF
1, 2, 3, 4, 5, 6
";
    let mut stream = CefStream::new(text.as_bytes()).expect("header");
    let matrix = stream.header().parameter("matrix").expect("matrix");
    assert_eq!(matrix.sizes, vec![3, 2]);
    assert_eq!(matrix.span, Some(0..6));

    let record = stream.next_record().expect("record");
    assert_eq!(record.integer_array(0).expect("matrix").len(), 6);
}
