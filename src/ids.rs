use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize, Serializer};
use snowflake::SnowflakeIdGenerator;
use svix_ksuid::KsuidLike;

// ─── Scheme tag ──────────────────────────────────────────────────

/// The identifier scheme a request or a storage table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdScheme {
    #[serde(rename = "ULID")]
    Ulid,
    #[serde(rename = "UUID")]
    Uuid,
    #[serde(rename = "KSUID")]
    Ksuid,
    #[serde(rename = "CUID")]
    Cuid,
    #[serde(rename = "NanoID")]
    NanoId,
    Snowflake,
    Unknown,
}

/// Route markers in match order. The first marker contained in a path wins.
const PATH_MARKERS: [(&str, IdScheme); 6] = [
    ("ulid", IdScheme::Ulid),
    ("uuid", IdScheme::Uuid),
    ("ksuid", IdScheme::Ksuid),
    ("cuid", IdScheme::Cuid),
    ("nano", IdScheme::NanoId),
    ("snow", IdScheme::Snowflake),
];

impl IdScheme {
    /// Every benchmarked scheme (excludes `Unknown`).
    pub const ALL: [IdScheme; 6] = [
        IdScheme::Ulid,
        IdScheme::Uuid,
        IdScheme::Ksuid,
        IdScheme::Cuid,
        IdScheme::NanoId,
        IdScheme::Snowflake,
    ];

    /// Classifies a route path by case-sensitive substring containment.
    ///
    /// `/ulid`, `/ulid/:id` and `/api/v1/ulid/123` all classify the same way;
    /// a path with no marker is `Unknown`.
    pub fn from_path(path: &str) -> Self {
        PATH_MARKERS
            .iter()
            .find(|(marker, _)| path.contains(marker))
            .map(|(_, scheme)| *scheme)
            .unwrap_or(IdScheme::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdScheme::Ulid => "ULID",
            IdScheme::Uuid => "UUID",
            IdScheme::Ksuid => "KSUID",
            IdScheme::Cuid => "CUID",
            IdScheme::NanoId => "NanoID",
            IdScheme::Snowflake => "Snowflake",
            IdScheme::Unknown => "Unknown",
        }
    }

    /// URL segment the CRUD routes for this scheme are mounted under.
    pub fn slug(&self) -> Option<&'static str> {
        match self {
            IdScheme::Ulid => Some("ulid"),
            IdScheme::Uuid => Some("uuid4"),
            IdScheme::Ksuid => Some("ksuid"),
            IdScheme::Cuid => Some("cuid"),
            IdScheme::NanoId => Some("nano"),
            IdScheme::Snowflake => Some("snow"),
            IdScheme::Unknown => None,
        }
    }

    /// Name of the users table holding this scheme's identifiers.
    pub fn table(&self) -> Option<&'static str> {
        match self {
            IdScheme::Ulid => Some("users_ulid"),
            IdScheme::Uuid => Some("users_uuid"),
            IdScheme::Ksuid => Some("users_ksuid"),
            IdScheme::Cuid => Some("users_cuid"),
            IdScheme::NanoId => Some("users_nanoid"),
            IdScheme::Snowflake => Some("users_snowflake"),
            IdScheme::Unknown => None,
        }
    }

    /// How identifiers of this scheme are stored.
    pub fn kind(&self) -> IdKind {
        match self {
            IdScheme::Uuid => IdKind::Uuid,
            IdScheme::Snowflake => IdKind::Integer,
            _ => IdKind::Text,
        }
    }
}

impl fmt::Display for IdScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown id type '{0}'")]
pub struct UnknownScheme(pub String);

impl FromStr for IdScheme {
    type Err = UnknownScheme;

    /// Accepts display names and route slugs, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ulid" => Ok(IdScheme::Ulid),
            "uuid" | "uuid4" => Ok(IdScheme::Uuid),
            "ksuid" => Ok(IdScheme::Ksuid),
            "cuid" => Ok(IdScheme::Cuid),
            "nanoid" | "nano" => Ok(IdScheme::NanoId),
            "snowflake" | "snow" => Ok(IdScheme::Snowflake),
            "unknown" => Ok(IdScheme::Unknown),
            _ => Err(UnknownScheme(s.to_owned())),
        }
    }
}

// ─── Identifier values ───────────────────────────────────────────

/// Storage representation of an identifier column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// TEXT column (ULID, KSUID, CUID, NanoID)
    Text,
    /// INTEGER column (Snowflake)
    Integer,
    /// 16-byte BLOB column (UUID)
    Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdValue {
    Text(String),
    Integer(i64),
    Uuid(uuid::Uuid),
}

impl IdKind {
    /// Parses an identifier taken from a URL segment. `None` when the raw
    /// value cannot be an identifier of this kind.
    pub fn parse(&self, raw: &str) -> Option<IdValue> {
        match self {
            IdKind::Text if !raw.is_empty() => Some(IdValue::Text(raw.to_owned())),
            IdKind::Text => None,
            IdKind::Integer => raw.parse().ok().map(IdValue::Integer),
            IdKind::Uuid => uuid::Uuid::parse_str(raw).ok().map(IdValue::Uuid),
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Text(s) => f.write_str(s),
            IdValue::Integer(n) => write!(f, "{n}"),
            IdValue::Uuid(u) => write!(f, "{}", u.hyphenated()),
        }
    }
}

/// Serialized as a string: snowflakes exceed the integer range JSON
/// clients can represent exactly.
impl Serialize for IdValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ─── Generators ──────────────────────────────────────────────────

/// Produces fresh identifiers for one scheme.
pub trait IdGenerator: Send + Sync {
    fn scheme(&self) -> IdScheme;
    fn generate(&self) -> IdValue;
}

pub struct UlidGenerator;

impl IdGenerator for UlidGenerator {
    fn scheme(&self) -> IdScheme {
        IdScheme::Ulid
    }
    fn generate(&self) -> IdValue {
        IdValue::Text(ulid::Ulid::new().to_string())
    }
}

pub struct UuidV4Generator;

impl IdGenerator for UuidV4Generator {
    fn scheme(&self) -> IdScheme {
        IdScheme::Uuid
    }
    fn generate(&self) -> IdValue {
        IdValue::Uuid(uuid::Uuid::new_v4())
    }
}

pub struct KsuidGenerator;

impl IdGenerator for KsuidGenerator {
    fn scheme(&self) -> IdScheme {
        IdScheme::Ksuid
    }
    fn generate(&self) -> IdValue {
        IdValue::Text(svix_ksuid::Ksuid::new(None, None).to_string())
    }
}

pub struct CuidGenerator;

impl IdGenerator for CuidGenerator {
    fn scheme(&self) -> IdScheme {
        IdScheme::Cuid
    }
    fn generate(&self) -> IdValue {
        IdValue::Text(cuid2::create_id())
    }
}

pub struct NanoIdGenerator;

impl IdGenerator for NanoIdGenerator {
    fn scheme(&self) -> IdScheme {
        IdScheme::NanoId
    }
    fn generate(&self) -> IdValue {
        IdValue::Text(nanoid::nanoid!())
    }
}

/// Snowflake generation mutates sequence state, so the generator is locked.
pub struct SnowflakeGenerator {
    inner: Mutex<SnowflakeIdGenerator>,
}

impl SnowflakeGenerator {
    pub fn new(machine_id: i32, node_id: i32) -> Self {
        Self {
            inner: Mutex::new(SnowflakeIdGenerator::new(machine_id, node_id)),
        }
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn scheme(&self) -> IdScheme {
        IdScheme::Snowflake
    }
    fn generate(&self) -> IdValue {
        IdValue::Integer(self.inner.lock().real_time_generate())
    }
}

/// Snowflake node of the HTTP service.
pub const SERVER_NODE_ID: i32 = 1;

/// Snowflake node of the `generate` subcommand, so seeding alongside a
/// running server never mints an id the server could also mint.
pub const SEEDER_NODE_ID: i32 = 2;

/// Returns the generator for a benchmarked scheme, as used by the server.
pub fn generator_for(scheme: IdScheme) -> Option<Arc<dyn IdGenerator>> {
    generator_for_node(scheme, SERVER_NODE_ID)
}

/// Like [`generator_for`], with Snowflake ids stamped with `node_id`.
pub fn generator_for_node(scheme: IdScheme, node_id: i32) -> Option<Arc<dyn IdGenerator>> {
    let generator: Arc<dyn IdGenerator> = match scheme {
        IdScheme::Ulid => Arc::new(UlidGenerator),
        IdScheme::Uuid => Arc::new(UuidV4Generator),
        IdScheme::Ksuid => Arc::new(KsuidGenerator),
        IdScheme::Cuid => Arc::new(CuidGenerator),
        IdScheme::NanoId => Arc::new(NanoIdGenerator),
        IdScheme::Snowflake => Arc::new(SnowflakeGenerator::new(1, node_id)),
        IdScheme::Unknown => return None,
    };
    Some(generator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_scheme_paths() {
        assert_eq!(IdScheme::from_path("/ulid/123"), IdScheme::Ulid);
        assert_eq!(IdScheme::from_path("/uuid4"), IdScheme::Uuid);
        assert_eq!(IdScheme::from_path("/api/v1/ksuid/123"), IdScheme::Ksuid);
        assert_eq!(IdScheme::from_path("/api/v1/cuid/123"), IdScheme::Cuid);
        assert_eq!(IdScheme::from_path("/api/v1/nano/123"), IdScheme::NanoId);
        assert_eq!(IdScheme::from_path("/api/v1/snow/123"), IdScheme::Snowflake);
        assert_eq!(IdScheme::from_path("/api/v1/other/xyz"), IdScheme::Unknown);
        assert_eq!(IdScheme::from_path("ulid/test"), IdScheme::Ulid);
    }

    #[test]
    fn trailing_id_segment_does_not_change_classification() {
        for scheme in IdScheme::ALL {
            let slug = scheme.slug().unwrap();
            let bare = format!("/{slug}");
            let with_id = format!("/{slug}/:id");
            assert_eq!(IdScheme::from_path(&bare), scheme);
            assert_eq!(IdScheme::from_path(&with_id), scheme);
        }
    }

    #[test]
    fn classification_is_case_sensitive() {
        assert_eq!(IdScheme::from_path("/ULID/1"), IdScheme::Unknown);
    }

    #[test]
    fn parses_names_and_slugs() {
        assert_eq!("KSUID".parse::<IdScheme>(), Ok(IdScheme::Ksuid));
        assert_eq!("uuid4".parse::<IdScheme>(), Ok(IdScheme::Uuid));
        assert_eq!("NanoID".parse::<IdScheme>(), Ok(IdScheme::NanoId));
        assert_eq!("snow".parse::<IdScheme>(), Ok(IdScheme::Snowflake));
        assert!("ksuids".parse::<IdScheme>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for scheme in IdScheme::ALL.into_iter().chain([IdScheme::Unknown]) {
            assert_eq!(scheme.as_str().parse::<IdScheme>(), Ok(scheme));
        }
    }

    #[test]
    fn serializes_with_display_names() {
        let json = serde_json::to_string(&IdScheme::NanoId).unwrap();
        assert_eq!(json, "\"NanoID\"");
    }

    #[test]
    fn generators_match_their_scheme_kind() {
        for scheme in IdScheme::ALL {
            let generator = generator_for(scheme).unwrap();
            assert_eq!(generator.scheme(), scheme);
            let value = generator.generate();
            let kind_matches = matches!(
                (scheme.kind(), &value),
                (IdKind::Text, IdValue::Text(_))
                    | (IdKind::Integer, IdValue::Integer(_))
                    | (IdKind::Uuid, IdValue::Uuid(_))
            );
            assert!(kind_matches, "{scheme} produced {value:?}");
        }
        assert!(generator_for(IdScheme::Unknown).is_none());
        assert!(generator_for_node(IdScheme::Unknown, SEEDER_NODE_ID).is_none());
    }

    #[test]
    fn server_and_seeder_snowflakes_never_collide() {
        let server = generator_for(IdScheme::Snowflake).unwrap();
        let seeder = generator_for_node(IdScheme::Snowflake, SEEDER_NODE_ID).unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            for generator in [&server, &seeder] {
                let IdValue::Integer(id) = generator.generate() else {
                    panic!("snowflake ids are integers");
                };
                assert!(seen.insert(id), "duplicate snowflake {id}");
            }
        }

        let IdValue::Integer(id) = seeder.generate() else {
            unreachable!()
        };
        assert_eq!((id >> 12) & 0x1F, SEEDER_NODE_ID as i64);
    }

    #[test]
    fn parses_url_ids_per_kind() {
        assert_eq!(IdKind::Integer.parse("42"), Some(IdValue::Integer(42)));
        assert_eq!(IdKind::Integer.parse("abc"), None);
        assert_eq!(IdKind::Text.parse(""), None);
        let u = uuid::Uuid::new_v4();
        assert_eq!(IdKind::Uuid.parse(&u.to_string()), Some(IdValue::Uuid(u)));
        assert_eq!(IdKind::Uuid.parse("not-a-uuid"), None);
    }

    #[test]
    fn snowflake_ids_serialize_as_strings() {
        let json = serde_json::to_string(&IdValue::Integer(7)).unwrap();
        assert_eq!(json, "\"7\"");
    }
}
