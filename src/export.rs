//! Export the timestamp store in a human-friendly format.

use std::{
    fmt, fs,
    io::{self, Write},
    path::Path,
};

use clap::ValueEnum;
use jiff::Timestamp;

use crate::db::{TimestampRecord, TimestampStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Json,
    Yaml,
    /// One `filename,timestamp` row per record, after a header row.
    Csv,
}

/// Writes every record in the store to `output`, where `-` means stdout.
///
/// Refuses to overwrite an existing file.
pub fn export(output: &Path, store: &TimestampStore, format: Format) -> anyhow::Result<()> {
    let _span = tracing::info_span!("exporting", ?output, ?format).entered();

    let records = store.dump_all()?;
    if records.is_empty() {
        tracing::info!("Timestamp store is empty");
    }

    if output == Path::new("-") {
        let stdout = io::stdout();
        return write_records(&mut stdout.lock(), records, format);
    }

    let mut file = fs::File::options()
        .write(true)
        .create_new(true)
        .open(output)
        .map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => {
                anyhow::anyhow!("Output file {} already exists", output.display())
            }
            _ => anyhow::Error::new(err)
                .context(format!("Could not create output file {}", output.display())),
        })?;

    write_records(&mut file, records, format)?;
    tracing::debug!(count = records.len(), "wrote records");

    Ok(())
}

fn write_records(
    writer: &mut impl Write,
    records: &[TimestampRecord],
    format: Format,
) -> anyhow::Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(writer.by_ref(), records)?;
            writeln!(writer)?;
        }
        Format::Yaml => serde_yaml::to_writer(writer.by_ref(), records)?,
        Format::Csv => {
            let mut csv = csv::Writer::from_writer(writer.by_ref());
            if records.is_empty() {
                csv.write_record(["filename", "timestamp"])?;
            }
            for record in records {
                csv.serialize(record)?;
            }
            csv.flush()?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Summary of what the timestamp store holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    pub records: usize,
    /// Size of the backing file, if it could be read.
    pub size: Option<u64>,
    pub oldest_pick: Option<Timestamp>,
    /// Records whose timestamp doesn't parse.
    pub unreadable: usize,
}

impl Statistics {
    pub fn gather(store: &TimestampStore) -> anyhow::Result<Self> {
        let records = store.dump_all()?;

        let size = match fs::metadata(store.path()) {
            Ok(meta) => Some(meta.len()),
            Err(err) => {
                tracing::warn!(path = ?store.path(), %err, "cannot read timestamp store file");
                None
            }
        };

        let mut oldest_pick: Option<Timestamp> = None;
        let mut unreadable = 0;
        for record in records {
            match record.timestamp.parse::<Timestamp>() {
                Ok(picked) => {
                    oldest_pick = Some(oldest_pick.map_or(picked, |oldest| oldest.min(picked)));
                }
                Err(_) => unreadable += 1,
            }
        }

        Ok(Self {
            records: records.len(),
            size,
            oldest_pick,
            unreadable,
        })
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "The timestamp store has {} records", self.records)?;
        match self.size {
            Some(size) => writeln!(f, "Disk usage: {size} bytes")?,
            None => writeln!(f, "Disk usage: unknown")?,
        }
        match self.oldest_pick {
            Some(oldest) => writeln!(f, "Oldest last picked: {oldest}")?,
            None => writeln!(f, "Oldest last picked: never")?,
        }
        if self.unreadable > 0 {
            writeln!(f, "Unreadable timestamps: {}", self.unreadable)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn store(dir: &TempDir) -> TimestampStore {
        let mut store = TimestampStore::new(Some(dir.path().join("db.json")));
        store.initialize().unwrap();
        store.store("a.jpg", "2024-01-01T00:00:00Z").unwrap();
        store.store("b.jpg", "2024-02-01T00:00:00Z").unwrap();
        store
    }

    #[test]
    fn exports_json() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let output = dir.path().join("dump.json");

        export(&output, &store, Format::Json).unwrap();

        let records: Vec<TimestampRecord> =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(records, store.dump_all().unwrap());
    }

    #[test]
    fn exports_yaml() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let output = dir.path().join("dump.yaml");

        export(&output, &store, Format::Yaml).unwrap();

        let records: Vec<TimestampRecord> =
            serde_yaml::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].filename, "b.jpg");
    }

    #[test]
    fn exports_csv() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.store("with, comma.jpg", "2024-03-01T00:00:00Z").unwrap();
        let output = dir.path().join("dump.csv");

        export(&output, &store, Format::Csv).unwrap();

        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "filename,timestamp\n\
             a.jpg,2024-01-01T00:00:00Z\n\
             b.jpg,2024-02-01T00:00:00Z\n\
             \"with, comma.jpg\",2024-03-01T00:00:00Z\n"
        );
    }

    #[test]
    fn empty_csv_still_has_a_header() {
        let dir = TempDir::new().unwrap();
        let mut store = TimestampStore::new(Some(dir.path().join("db.json")));
        store.initialize().unwrap();

        let mut out = Vec::new();
        write_records(&mut out, store.dump_all().unwrap(), Format::Csv).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "filename,timestamp\n");
    }

    #[test]
    fn statistics() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.store("c.jpg", "some day").unwrap();

        let stats = Statistics::gather(&store).unwrap();

        assert_eq!(stats.records, 3);
        assert_eq!(
            stats.size,
            Some(fs::metadata(dir.path().join("db.json")).unwrap().len())
        );
        assert_eq!(
            stats.oldest_pick,
            Some("2024-01-01T00:00:00Z".parse().unwrap())
        );
        assert_eq!(stats.unreadable, 1);

        let text = stats.to_string();
        assert!(text.contains("3 records"));
        assert!(text.contains("Oldest last picked: 2024-01-01T00:00:00Z"));
    }

    #[test]
    fn statistics_of_an_empty_store() {
        let dir = TempDir::new().unwrap();
        let mut store = TimestampStore::new(Some(dir.path().join("db.json")));
        store.initialize().unwrap();

        let stats = Statistics::gather(&store).unwrap();

        assert_eq!(stats.records, 0);
        assert_eq!(stats.oldest_pick, None);
        assert!(stats.to_string().contains("never"));
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let output = dir.path().join("dump.json");
        fs::write(&output, "precious").unwrap();

        let err = export(&output, &store, Format::Json).unwrap_err();

        assert!(err.to_string().contains("already exists"));
        assert_eq!(fs::read_to_string(&output).unwrap(), "precious");
    }
}
