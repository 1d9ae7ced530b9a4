//! 도메인 타입 -- 로그 메시지와 로그 패킷
//!
//! [`LogPacket`]은 하나의 emitter가 보낸 메시지 묶음으로, 분배 엔진이 analyzer에
//! 전달하는 단위입니다. 구성 이후에는 [`LogPacket::add_message`]를 제외하고
//! 내부 상태를 바꿀 수 없으며, 메시지 수는 항상 메시지 벡터 길이에서 파생됩니다.
//!
//! # 와이어 형식
//! ```text
//! {id, emitterId, timestamp, messages:[{id,timestamp,level,message,source,metadata}], metadata, size}
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ParseError;

/// 임의 키-값 메타데이터
pub type Metadata = Map<String, Value>;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 타임스탬프 문자열을 UTC로 해석합니다.
///
/// 오프셋이 있으면 UTC로 변환하고, 오프셋 없는 ISO 8601 날짜/일시는 UTC로 간주합니다.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(timestamp) = raw.parse::<DateTime<Utc>>() {
        return Some(timestamp);
    }
    if let Ok(naive) = raw.parse::<NaiveDateTime>() {
        return Some(naive.and_utc());
    }
    raw.parse::<NaiveDate>()
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `null`이면 현재 시각
fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(Utc::now()),
        Some(raw) => parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'"))),
    }
}

/// `null`이면 빈 메타데이터
fn deserialize_metadata<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Metadata, D::Error> {
    Ok(Option::<Metadata>::deserialize(deserializer)?.unwrap_or_default())
}

/// 로그 심각도
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// 디버그
    Debug,
    /// 정보
    #[default]
    Info,
    /// 경고
    Warn,
    /// 에러
    Error,
    /// 치명적 에러
    Fatal,
}

impl LogLevel {
    /// 대소문자를 구분하지 않고 레벨 문자열을 파싱합니다.
    ///
    /// `warning`은 `Warn`, `critical`/`crit`은 `Fatal`로 매핑합니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "fatal" | "critical" | "crit" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// 와이어 형식 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_str_loose(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown log level '{raw}'")))
    }
}

/// 단일 로그 이벤트
///
/// 생성 후에는 불변입니다. `with_*` 메서드는 구성 단계에서만 사용합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(default = "new_id")]
    id: String,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    level: LogLevel,
    #[serde(default)]
    message: String,
    #[serde(default)]
    source: String,
    #[serde(default, deserialize_with = "deserialize_metadata")]
    metadata: Metadata,
}

impl LogMessage {
    /// 새 메시지를 생성합니다. id와 타임스탬프는 자동으로 채워집니다.
    pub fn new(level: LogLevel, message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: source.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// 분배 단위 -- 한 emitter의 메시지 묶음
///
/// 메시지 순서는 도착 순서를 보존합니다. 메시지 수는 별도 필드로 저장하지 않고
/// 항상 `messages.len()`에서 계산하므로 관측자가 오래된 값을 볼 수 없습니다.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPacket {
    #[serde(default = "new_id")]
    id: String,
    emitter_id: String,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    messages: Vec<LogMessage>,
    #[serde(default, deserialize_with = "deserialize_metadata")]
    metadata: Metadata,
}

impl LogPacket {
    /// 빈 패킷을 생성합니다.
    pub fn new(emitter_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            emitter_id: emitter_id.into(),
            timestamp: Utc::now(),
            messages: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// 메시지 목록을 지정합니다.
    pub fn with_messages(mut self, messages: Vec<LogMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// 패킷 메타데이터를 지정합니다.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// 메시지를 끝에 추가합니다.
    pub fn add_message(&mut self, message: LogMessage) {
        self.messages.push(message);
    }

    /// 현재 보유한 메시지 수
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn messages(&self) -> &[LogMessage] {
        &self.messages
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn emitter_id(&self) -> &str {
        &self.emitter_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// 수신 측 제출 본문(`{emitterId, messages, metadata?}`)을 패킷으로 변환합니다.
    ///
    /// - `emitterId`는 비어 있지 않은 문자열이어야 합니다.
    /// - `messages`는 배열이어야 합니다 (빈 배열 허용).
    /// - `source`가 없는 메시지는 emitter id를 source로 사용합니다.
    /// - `level`이 없는 메시지는 `info`로 처리합니다.
    /// - `timestamp`가 없거나 `null`이면 현재 시각, 오프셋이 없으면 UTC로 봅니다.
    /// - `metadata`가 없거나 `null`이면 빈 객체로 처리합니다.
    pub fn from_submission(submission: Value) -> Result<Self, ParseError> {
        let Value::Object(mut body) = submission else {
            return Err(invalid("submission must be a JSON object"));
        };

        let emitter_id = match body.remove("emitterId") {
            Some(Value::String(id)) if !id.trim().is_empty() => id,
            _ => return Err(invalid("emitterId is required")),
        };

        let raw_messages = match body.remove("messages") {
            Some(Value::Array(items)) => items,
            _ => return Err(invalid("messages must be an array")),
        };

        let metadata = match body.remove("metadata") {
            None | Some(Value::Null) => Metadata::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(invalid("metadata must be an object")),
        };

        let mut packet = Self::new(emitter_id).with_metadata(metadata);
        for (index, raw) in raw_messages.into_iter().enumerate() {
            let Value::Object(mut fields) = raw else {
                return Err(invalid(format!("messages[{index}] must be an object")));
            };

            let has_source = matches!(fields.get("source"), Some(Value::String(s)) if !s.is_empty());
            if !has_source {
                fields.insert(
                    "source".to_owned(),
                    Value::String(packet.emitter_id.clone()),
                );
            }

            let message: LogMessage = serde_json::from_value(Value::Object(fields))
                .map_err(|e| invalid(format!("messages[{index}]: {e}")))?;
            packet.add_message(message);
        }

        Ok(packet)
    }
}

impl Serialize for LogPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("LogPacket", 6)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("emitterId", &self.emitter_id)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("messages", &self.messages)?;
        state.serialize_field("metadata", &self.metadata)?;
        state.serialize_field("size", &self.messages.len())?;
        state.end()
    }
}

fn invalid(reason: impl Into<String>) -> ParseError {
    ParseError::InvalidPacket {
        reason: reason.into(),
    }
}
