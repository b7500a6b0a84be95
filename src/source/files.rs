//! Granule files on local disk.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{CountingGranules, FullReader, GranuleIndex, Granules, Reader, RecordSource};
use crate::parse::cef::{CefReaderConfig, CefStream};
use crate::parse::das2::{Das2ReaderConfig, Das2Stream};
use crate::record::{EmptyStream, RecordStream};
use crate::time::{DecomposedTime, TimeRange, DAY, HOUR, MONTH, YEAR};
use crate::{Error, Result};

/// Length of one granule file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Year,
    Month,
    #[default]
    Day,
    Hour,
}

impl Cadence {
    fn digit(self) -> usize {
        match self {
            Cadence::Year => YEAR,
            Cadence::Month => MONTH,
            Cadence::Day => DAY,
            Cadence::Hour => HOUR,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Cef,
    Das2,
}

/// Configuration for a [`FileSource`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSourceConfig {
    /// Directory holding the granule files.
    pub root: PathBuf,

    /// File name template relative to `root`. Recognised fields: `$Y` year,
    /// `$m` month, `$d` day of month, `$j` day of year, `$H` hour.
    /// Example: `$Y/C1_CP_FGM_SPIN__$Y$m$d.cef`
    pub template: String,

    #[serde(default)]
    pub cadence: Cadence,

    #[serde(default)]
    pub format: StreamFormat,

    #[serde(default)]
    pub cef: CefReaderConfig,

    #[serde(default)]
    pub das2: Das2ReaderConfig,
}

impl FileSourceConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Source backed by one file per granule. A granule with no file on disk
/// is an empty granule. `name.gz` is read when `name` does not exist.
pub struct FileSource {
    config: FileSourceConfig,
}

impl FileSource {
    pub fn new(config: FileSourceConfig) -> Result<Self> {
        check_template(&config.template)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FileSourceConfig {
        &self.config
    }

    /// Path of the granule file starting at `start`, before the `.gz`
    /// fallback.
    pub fn granule_path(&self, start: &DecomposedTime) -> Result<PathBuf> {
        Ok(self.config.root.join(expand(&self.config.template, start)?))
    }

    fn resolve(&self, range: &TimeRange) -> Result<Option<PathBuf>> {
        let path = self.granule_path(&range.start)?;
        if path.is_file() {
            return Ok(Some(path));
        }
        let mut gz = path.into_os_string();
        gz.push(".gz");
        let gz = PathBuf::from(gz);
        Ok(gz.is_file().then_some(gz))
    }
}

impl FullReader for FileSource {
    fn records(&mut self, range: &TimeRange) -> Result<Box<dyn RecordStream>> {
        let Some(path) = self.resolve(range)? else {
            log::debug!("no granule file for {range}");
            return Ok(Box::new(EmptyStream));
        };
        log::debug!("opening {}", path.display());
        let input = open_input(&path)?;
        Ok(match self.config.format {
            StreamFormat::Cef => Box::new(CefStream::with_config(input, &self.config.cef)?),
            StreamFormat::Das2 => Box::new(Das2Stream::with_config(input, &self.config.das2)?),
        })
    }
}

impl GranuleIndex for FileSource {
    fn granules(&mut self, range: &TimeRange) -> Result<Granules> {
        Ok(Box::new(CountingGranules::new(range, self.config.cadence.digit())?))
    }
}

impl RecordSource for FileSource {
    fn reader(&mut self) -> Reader<'_> {
        Reader::Full(self)
    }

    fn granule_index(&mut self) -> Option<&mut dyn GranuleIndex> {
        Some(self)
    }

    fn time_stamp(&self, range: &TimeRange) -> Option<String> {
        let path = self.resolve(range).ok()??;
        let modified = fs::metadata(path).ok()?.modified().ok()?;
        Some(DecomposedTime::from(OffsetDateTime::from(modified)).iso_millis())
    }
}

/// Open a file for reading, decompressing `.gz` files.
pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn check_template(template: &str) -> Result<()> {
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c == '$' && !matches!(chars.next(), Some('Y' | 'm' | 'd' | 'j' | 'H')) {
            return Err(Error::Config(format!("bad field in file template {template:?}")));
        }
    }
    Ok(())
}

fn expand(template: &str, time: &DecomposedTime) -> Result<String> {
    let d = time.digits();
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(&format!("{:04}", d[YEAR])),
            Some('m') => out.push_str(&format!("{:02}", d[MONTH])),
            Some('d') => out.push_str(&format!("{:02}", d[DAY])),
            Some('H') => out.push_str(&format!("{:02}", d[HOUR])),
            Some('j') => {
                let ordinal = time.to_datetime()?.ordinal();
                out.push_str(&format!("{ordinal:03}"));
            }
            other => {
                return Err(Error::Config(format!(
                    "bad field ${} in file template",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_expands_calendar_and_ordinal_fields() {
        let time = DecomposedTime::new(2004, 3, 1, 7, 0, 0, 0).unwrap();
        assert_eq!(
            expand("$Y/$j/data_$Y$m$d_$H.cef", &time).unwrap(),
            "2004/061/data_20040301_07.cef"
        );
    }

    #[test]
    fn unknown_template_field_is_rejected() {
        let config = FileSourceConfig {
            root: PathBuf::from("."),
            template: "$Y$q.cef".to_string(),
            cadence: Cadence::Day,
            format: StreamFormat::Cef,
            cef: CefReaderConfig::default(),
            das2: Das2ReaderConfig::default(),
        };
        assert!(matches!(FileSource::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn config_defaults_from_json() {
        let config: FileSourceConfig =
            serde_json::from_str(r#"{"root": "/data", "template": "$Y$m$d.d2s", "format": "das2"}"#)
                .unwrap();
        assert_eq!(config.cadence, Cadence::Day);
        assert_eq!(config.format, StreamFormat::Das2);
        assert_eq!(config.cef.buffer_size, CefReaderConfig::default().buffer_size);
    }
}
