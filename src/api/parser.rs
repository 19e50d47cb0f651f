use chrono::{DateTime, Duration, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::sync::OnceLock;

/// One listing extracted from an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub title: String,
    /// Upstream `snippet`
    pub description: String,
    pub company: String,
    pub location: String,
    /// Canonical listing URL, the dedup key
    pub url: String,
    pub salary: String,
    pub job_type: String,
    pub site: String,
    pub logo: String,
    /// Raw age text such as "3 days ago"
    pub age: String,
    pub postcode: String,
    /// Derived from `age`; the parse time when `age` is unparseable
    pub posted_at: DateTime<Utc>,
}

/// Child elements of `<job>` that map onto [`JobRecord`] fields.
#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Snippet,
    Company,
    Location,
    Url,
    Salary,
    JobType,
    Site,
    Logo,
    Age,
    Postcode,
}

const FIELD_COUNT: usize = 11;

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        Some(match tag {
            b"title" => Field::Title,
            b"snippet" => Field::Snippet,
            b"company" => Field::Company,
            b"location" => Field::Location,
            b"url" => Field::Url,
            b"salary" => Field::Salary,
            b"job_type" => Field::JobType,
            b"site" => Field::Site,
            b"logo" => Field::Logo,
            b"age" => Field::Age,
            b"postcode" => Field::Postcode,
            _ => return None,
        })
    }
}

/// Text collected for a `<job>` element while it is open.
#[derive(Default)]
struct JobFields {
    values: [Option<String>; FIELD_COUNT],
}

impl JobFields {
    /// Start collecting a field. Repeated children keep their first occurrence.
    fn open(&mut self, field: Field) -> bool {
        let slot = &mut self.values[field as usize];
        if slot.is_some() {
            return false;
        }
        *slot = Some(String::new());
        true
    }

    fn append(&mut self, field: Field, text: &str) {
        if let Some(value) = self.values[field as usize].as_mut() {
            value.push_str(text);
        }
    }

    fn take(&mut self, field: Field) -> String {
        self.values[field as usize]
            .take()
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    fn into_record(mut self, now: DateTime<Utc>) -> JobRecord {
        let age = self.take(Field::Age);
        JobRecord {
            title: self.take(Field::Title),
            description: self.take(Field::Snippet),
            company: self.take(Field::Company),
            location: self.take(Field::Location),
            url: self.take(Field::Url),
            salary: self.take(Field::Salary),
            job_type: self.take(Field::JobType),
            site: self.take(Field::Site),
            logo: self.take(Field::Logo),
            postcode: self.take(Field::Postcode),
            posted_at: parse_job_date(&age, now),
            age,
        }
    }
}

/// An open `<job>` element and the field currently being collected.
struct OpenJob {
    depth: usize,
    fields: JobFields,
    field: Option<Field>,
}

/// Parse an upstream XML payload into job records.
///
/// Every `<job>` element (at any depth, but not nested in another job) yields
/// one record. Missing children produce empty strings. Text and CDATA content
/// are both collected, including text of nested markup inside a field.
///
/// # Errors
///
/// Returns a description of the problem when the payload is not well-formed
/// XML: syntax errors, mismatched or unclosed elements, or no root element.
/// A well-formed document without `<job>` elements yields an empty `Vec`.
///
/// # Security
///
/// `quick-xml` (0.37) does not parse `<!ENTITY>` declarations, so custom
/// entities fail to unescape instead of expanding (no XXE).
pub fn parse_jobs(bytes: &[u8], now: DateTime<Utc>) -> Result<Vec<JobRecord>, String> {
    let mut reader = Reader::from_reader(bytes);
    // Whitespace inside fields is significant until the value is trimmed
    reader.config_mut().trim_text(false);

    let mut jobs = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut saw_root = false;
    let mut root_closed = false;
    let mut open: Option<OpenJob> = None;

    loop {
        let event = reader.read_event_into(&mut buf);
        if root_closed {
            match &event {
                Ok(Event::Start(_) | Event::Empty(_) | Event::CData(_)) => {
                    return Err(trailing_content(reader.buffer_position()));
                }
                Ok(Event::Text(e)) if !e.iter().all(u8::is_ascii_whitespace) => {
                    return Err(trailing_content(reader.buffer_position()));
                }
                _ => {}
            }
        }
        match event {
            Ok(Event::Start(e)) => {
                depth += 1;
                saw_root = true;
                let name = e.local_name();
                match open.as_mut() {
                    None if name.as_ref() == b"job" => {
                        open = Some(OpenJob {
                            depth,
                            fields: JobFields::default(),
                            field: None,
                        });
                    }
                    Some(job) if depth == job.depth + 1 => {
                        job.field = Field::from_tag(name.as_ref())
                            .filter(|&field| job.fields.open(field));
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                saw_root = true;
                root_closed = depth == 0;
                let name = e.local_name();
                match open.as_mut() {
                    None if name.as_ref() == b"job" => {
                        jobs.push(JobFields::default().into_record(now));
                    }
                    Some(job) if depth == job.depth => {
                        if let Some(field) = Field::from_tag(name.as_ref()) {
                            job.fields.open(field);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if let Some(job) = open.as_mut() {
                    if depth == job.depth {
                        if let Some(job) = open.take() {
                            jobs.push(job.fields.into_record(now));
                        }
                    } else if depth == job.depth + 1 {
                        job.field = None;
                    }
                }
                depth = depth.saturating_sub(1);
                root_closed = depth == 0;
            }
            Ok(Event::Text(e)) => {
                if let Some(OpenJob {
                    fields,
                    field: Some(field),
                    ..
                }) = open.as_mut()
                {
                    let text = e.unescape().map_err(|err| {
                        format!("{} at position {}", err, reader.buffer_position())
                    })?;
                    fields.append(*field, &text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(OpenJob {
                    fields,
                    field: Some(field),
                    ..
                }) = open.as_mut()
                {
                    fields.append(*field, &String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!("{} at position {}", e, reader.error_position()));
            }
            _ => {}
        }
        buf.clear();
    }

    if depth > 0 {
        return Err("unexpected end of document: unclosed element".to_string());
    }
    if !saw_root {
        return Err("document has no root element".to_string());
    }

    Ok(jobs)
}

fn trailing_content(position: impl std::fmt::Display) -> String {
    format!("extra content after the root element at position {}", position)
}

static DAYS_PATTERN: OnceLock<Regex> = OnceLock::new();
static HOURS_PATTERN: OnceLock<Regex> = OnceLock::new();

fn days_pattern() -> &'static Regex {
    DAYS_PATTERN.get_or_init(|| Regex::new(r"(?i)(\d+)\s*day").expect("static regex"))
}

fn hours_pattern() -> &'static Regex {
    HOURS_PATTERN.get_or_init(|| Regex::new(r"(?i)(\d+)\s*hour").expect("static regex"))
}

/// Derive a posting timestamp from an upstream age string.
///
/// Tries `<N> day(s)` first, then `<N> hour(s)`, matching case-insensitively
/// anywhere in the text. Anything else (including empty text and counts too
/// large to represent) yields `now`.
pub fn parse_job_date(age: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let offset = |pattern: &Regex, unit: fn(i64) -> Option<Duration>| {
        pattern
            .captures(age)
            .and_then(|caps| caps[1].parse::<i64>().ok())
            .and_then(unit)
            .and_then(|delta| now.checked_sub_signed(delta))
    };

    offset(days_pattern(), Duration::try_days)
        .or_else(|| offset(hours_pattern(), Duration::try_hours))
        .unwrap_or(now)
}
