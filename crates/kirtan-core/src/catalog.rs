//! Stream catalog and time-of-day schedule table.
//!
//! The catalog is loaded once at startup and never mutated.  Validation
//! happens at load time so the scheduler and controller can treat its
//! contents as well-formed: ids are unique, schedule entries reference real
//! streams, and no hour is claimed by two entries.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One selectable stream.  A `url` ending in `/` marks a *directory stream*:
/// its playable files are discovered at runtime by scanning the server's
/// index page.  Anything else is a *direct stream* with a single source url.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: String,
    pub name: String,
    pub url: String,
}

impl StreamDescriptor {
    pub fn is_directory(&self) -> bool {
        self.url.ends_with('/')
    }
}

/// A time-of-day range mapped to a stream id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub stream_id: String,
    pub label: String,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ScheduleEntry {
    /// Half-open containment check.  `start_hour >= end_hour` wraps
    /// midnight: the range covers `hour >= start OR hour < end`.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    pub fn wraps(&self) -> bool {
        self.start_hour >= self.end_hour
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog has no streams")]
    Empty,
    #[error("duplicate stream id '{0}'")]
    DuplicateStreamId(String),
    #[error("stream '{id}' has an empty url")]
    EmptyUrl { id: String },
    #[error("schedule entry '{label}' references unknown stream id '{stream_id}'")]
    UnknownScheduleStream { label: String, stream_id: String },
    #[error("schedule entry '{label}' has an hour outside 0-23")]
    HourOutOfRange { label: String },
    #[error("schedule has more than one midnight-wrapping entry ('{first}', '{second}')")]
    MultipleWrappingEntries { first: String, second: String },
    #[error("schedule entries '{first}' and '{second}' both claim hour {hour}")]
    OverlappingEntries {
        first: String,
        second: String,
        hour: u32,
    },
    #[error("invalid base url '{0}'")]
    BadBaseUrl(String),
    #[error("stream '{id}' url '{url}' cannot be resolved against '{base}'")]
    BadStreamUrl { id: String, url: String, base: String },
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone)]
pub struct Catalog {
    streams: Vec<StreamDescriptor>,
    schedule: Vec<ScheduleEntry>,
}

impl Catalog {
    pub fn new(
        streams: Vec<StreamDescriptor>,
        schedule: Vec<ScheduleEntry>,
    ) -> Result<Self, CatalogError> {
        let catalog = Self { streams, schedule };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn schedule(&self) -> &[ScheduleEntry] {
        &self.schedule
    }

    /// Panics on an out-of-range index; the controller only holds indices
    /// it obtained from this catalog.
    pub fn stream(&self, idx: usize) -> &StreamDescriptor {
        &self.streams[idx]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.streams.iter().position(|s| s.id == id)
    }

    pub fn stream_by_id(&self, id: &str) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.id == id)
    }

    /// The catalog the daemon falls back to when no `streams.toml` exists:
    /// the Gurdwara programme this player was built around.  Urls are
    /// relative and get pinned by [`Catalog::resolve_urls`].
    pub fn builtin() -> Self {
        fn stream(id: &str, name: &str, url: &str) -> StreamDescriptor {
            StreamDescriptor {
                id: id.into(),
                name: name.into(),
                url: url.into(),
            }
        }
        fn entry(stream_id: &str, label: &str, start_hour: u32, end_hour: u32) -> ScheduleEntry {
            ScheduleEntry {
                stream_id: stream_id.into(),
                label: label.into(),
                start_hour,
                end_hour,
            }
        }

        Self {
            streams: vec![
                stream("live", "Live Gurdwara", "media/hazuri1.mp3"),
                stream("asa", "Asa Ki Vaar", "media/asa_ki_vaar.mp3"),
                stream("rehraas", "Rehraas Sahib", "media/rehraas.mp3"),
                stream("sohila", "Sohila / Night Simran", "media/sohila.mp3"),
                // Directory stream: files are discovered at runtime.
                stream("morning", "Morning Nitnem", "media/morning_nitnem/"),
                stream("tabla", "Tabla / Harmonium", "media/tabla_harmonium.mp3"),
            ],
            schedule: vec![
                entry("morning", "Amrit Vela → Morning Nitnem", 4, 6),
                entry("asa", "Morning → Asa Ki Vaar", 6, 12),
                entry("live", "Daytime → Live Gurdwara", 12, 18),
                entry("rehraas", "Evening → Rehraas Sahib", 18, 21),
                entry("sohila", "Night → Sohila / Simran", 21, 3),
            ],
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let file: TomlCatalogFile = toml::from_str(content)?;
        let streams = file
            .stream
            .into_iter()
            .map(|s| StreamDescriptor {
                id: s.id,
                name: s.name,
                url: s.url,
            })
            .collect();
        let schedule = file
            .schedule
            .into_iter()
            .map(|e| ScheduleEntry {
                stream_id: e.stream,
                label: e.label,
                start_hour: e.start_hour,
                end_hour: e.end_hour,
            })
            .collect();
        Self::new(streams, schedule)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve relative stream urls against `base_url` so descriptors are
    /// always absolute after load.  `Url::join` keeps the trailing slash,
    /// so directory streams stay directory streams.
    pub fn resolve_urls(&mut self, base_url: &str) -> Result<(), CatalogError> {
        let base = reqwest::Url::parse(base_url)
            .map_err(|_| CatalogError::BadBaseUrl(base_url.to_string()))?;
        for stream in &mut self.streams {
            if reqwest::Url::parse(&stream.url).is_ok() {
                continue;
            }
            let resolved = base
                .join(&stream.url)
                .map_err(|_| CatalogError::BadStreamUrl {
                    id: stream.id.clone(),
                    url: stream.url.clone(),
                    base: base_url.to_string(),
                })?;
            stream.url = resolved.to_string();
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.streams.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut ids = HashSet::new();
        for stream in &self.streams {
            if !ids.insert(stream.id.as_str()) {
                return Err(CatalogError::DuplicateStreamId(stream.id.clone()));
            }
            if stream.url.is_empty() {
                return Err(CatalogError::EmptyUrl {
                    id: stream.id.clone(),
                });
            }
        }

        let mut wrapping: Option<&ScheduleEntry> = None;
        let mut claimed: [Option<usize>; 24] = [None; 24];
        for (idx, entry) in self.schedule.iter().enumerate() {
            if entry.start_hour > 23 || entry.end_hour > 23 {
                return Err(CatalogError::HourOutOfRange {
                    label: entry.label.clone(),
                });
            }
            if !ids.contains(entry.stream_id.as_str()) {
                return Err(CatalogError::UnknownScheduleStream {
                    label: entry.label.clone(),
                    stream_id: entry.stream_id.clone(),
                });
            }
            if entry.wraps() {
                if let Some(first) = wrapping {
                    return Err(CatalogError::MultipleWrappingEntries {
                        first: first.label.clone(),
                        second: entry.label.clone(),
                    });
                }
                wrapping = Some(entry);
            }
            for hour in 0..24 {
                if !entry.contains(hour) {
                    continue;
                }
                if let Some(prev) = claimed[hour as usize] {
                    return Err(CatalogError::OverlappingEntries {
                        first: self.schedule[prev].label.clone(),
                        second: entry.label.clone(),
                        hour,
                    });
                }
                claimed[hour as usize] = Some(idx);
            }
        }
        Ok(())
    }
}

/// Intermediate structs matching the TOML `[[stream]]` / `[[schedule]]`
/// tables.  Kept separate from the runtime types so the file schema can
/// diverge without breaking either.
#[derive(Debug, Deserialize)]
struct TomlCatalogFile {
    #[serde(default)]
    stream: Vec<TomlStream>,
    #[serde(default)]
    schedule: Vec<TomlSchedule>,
}

#[derive(Debug, Deserialize)]
struct TomlStream {
    id: String,
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct TomlSchedule {
    stream: String,
    label: String,
    start_hour: u32,
    end_hour: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_passes_validation() {
        let builtin = Catalog::builtin();
        let revalidated = Catalog::new(builtin.streams().to_vec(), builtin.schedule().to_vec());
        assert!(revalidated.is_ok());
    }

    #[test]
    fn directory_streams_end_with_slash() {
        let catalog = Catalog::builtin();
        let morning = catalog.stream_by_id("morning").unwrap();
        assert!(morning.is_directory());
        let live = catalog.stream_by_id("live").unwrap();
        assert!(!live.is_directory());
    }

    #[test]
    fn parses_toml_catalog() {
        let catalog = Catalog::from_toml_str(
            r#"
            [[stream]]
            id = "a"
            name = "Stream A"
            url = "http://radio.test/a.mp3"

            [[stream]]
            id = "b"
            name = "Stream B"
            url = "http://radio.test/b/"

            [[schedule]]
            stream = "a"
            label = "Day"
            start_hour = 6
            end_hour = 18

            [[schedule]]
            stream = "b"
            label = "Night"
            start_hour = 18
            end_hour = 6
            "#,
        )
        .unwrap();
        assert_eq!(catalog.streams().len(), 2);
        assert!(catalog.stream_by_id("b").unwrap().is_directory());
        assert_eq!(catalog.schedule()[1].stream_id, "b");
    }

    #[test]
    fn rejects_duplicate_stream_ids() {
        let err = Catalog::new(
            vec![
                StreamDescriptor {
                    id: "x".into(),
                    name: "X".into(),
                    url: "http://radio.test/x.mp3".into(),
                },
                StreamDescriptor {
                    id: "x".into(),
                    name: "X again".into(),
                    url: "http://radio.test/x2.mp3".into(),
                },
            ],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateStreamId(id) if id == "x"));
    }

    #[test]
    fn rejects_schedule_referencing_unknown_stream() {
        let err = Catalog::new(
            vec![StreamDescriptor {
                id: "x".into(),
                name: "X".into(),
                url: "http://radio.test/x.mp3".into(),
            }],
            vec![ScheduleEntry {
                stream_id: "missing".into(),
                label: "Ghost".into(),
                start_hour: 0,
                end_hour: 12,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownScheduleStream { .. }));
    }

    #[test]
    fn rejects_two_wrapping_entries() {
        let streams = vec![StreamDescriptor {
            id: "x".into(),
            name: "X".into(),
            url: "http://radio.test/x.mp3".into(),
        }];
        let err = Catalog::new(
            streams,
            vec![
                ScheduleEntry {
                    stream_id: "x".into(),
                    label: "First wrap".into(),
                    start_hour: 22,
                    end_hour: 2,
                },
                ScheduleEntry {
                    stream_id: "x".into(),
                    label: "Second wrap".into(),
                    start_hour: 23,
                    end_hour: 3,
                },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::MultipleWrappingEntries { .. }));
    }

    #[test]
    fn rejects_overlapping_entries() {
        let streams = vec![StreamDescriptor {
            id: "x".into(),
            name: "X".into(),
            url: "http://radio.test/x.mp3".into(),
        }];
        let err = Catalog::new(
            streams,
            vec![
                ScheduleEntry {
                    stream_id: "x".into(),
                    label: "Morning".into(),
                    start_hour: 6,
                    end_hour: 12,
                },
                ScheduleEntry {
                    stream_id: "x".into(),
                    label: "Late morning".into(),
                    start_hour: 11,
                    end_hour: 14,
                },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::OverlappingEntries { hour: 11, .. }));
    }

    #[test]
    fn rejects_hours_out_of_range() {
        let streams = vec![StreamDescriptor {
            id: "x".into(),
            name: "X".into(),
            url: "http://radio.test/x.mp3".into(),
        }];
        let err = Catalog::new(
            streams,
            vec![ScheduleEntry {
                stream_id: "x".into(),
                label: "Bad".into(),
                start_hour: 6,
                end_hour: 24,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::HourOutOfRange { .. }));
    }

    #[test]
    fn resolves_relative_urls_against_base() {
        let mut catalog = Catalog::builtin();
        catalog.resolve_urls("http://127.0.0.1:8000/").unwrap();
        assert_eq!(
            catalog.stream_by_id("live").unwrap().url,
            "http://127.0.0.1:8000/media/hazuri1.mp3"
        );
        let morning = catalog.stream_by_id("morning").unwrap();
        assert_eq!(morning.url, "http://127.0.0.1:8000/media/morning_nitnem/");
        assert!(morning.is_directory());
    }

    #[test]
    fn resolve_urls_leaves_absolute_urls_alone() {
        let mut catalog = Catalog::new(
            vec![StreamDescriptor {
                id: "x".into(),
                name: "X".into(),
                url: "https://streams.example.org/x.mp3".into(),
            }],
            vec![],
        )
        .unwrap();
        catalog.resolve_urls("http://127.0.0.1:8000/").unwrap();
        assert_eq!(
            catalog.stream_by_id("x").unwrap().url,
            "https://streams.example.org/x.mp3"
        );
    }

    #[test]
    fn loads_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streams.toml");
        std::fs::write(
            &path,
            r#"
            [[stream]]
            id = "only"
            name = "Only"
            url = "http://radio.test/only.mp3"
            "#,
        )
        .unwrap();
        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.streams().len(), 1);
        assert!(catalog.schedule().is_empty());
    }
}
