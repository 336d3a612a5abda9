//! Sparkplug B topic namespace: `spBv1.0/{group}/{msg_type}/{edge_node}[/{device}]`.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    NBirth,
    NDeath,
    NData,
    NCmd,
    DBirth,
    DDeath,
    DData,
    DCmd,
}

impl MessageType {
    fn as_str(self) -> &'static str {
        match self {
            MessageType::NBirth => "NBIRTH",
            MessageType::NDeath => "NDEATH",
            MessageType::NData => "NDATA",
            MessageType::NCmd => "NCMD",
            MessageType::DBirth => "DBIRTH",
            MessageType::DDeath => "DDEATH",
            MessageType::DData => "DDATA",
            MessageType::DCmd => "DCMD",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "NBIRTH" => Some(MessageType::NBirth),
            "NDEATH" => Some(MessageType::NDeath),
            "NDATA" => Some(MessageType::NData),
            "NCMD" => Some(MessageType::NCmd),
            "DBIRTH" => Some(MessageType::DBirth),
            "DDEATH" => Some(MessageType::DDeath),
            "DDATA" => Some(MessageType::DData),
            "DCMD" => Some(MessageType::DCmd),
            _ => None,
        }
    }

    /// Device-scoped message types carry a device id segment; node-scoped
    /// ones (NBIRTH/NDEATH/NDATA/NCMD) do not.
    pub fn is_device_scoped(self) -> bool {
        matches!(
            self,
            MessageType::DBirth | MessageType::DDeath | MessageType::DData | MessageType::DCmd
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SparkplugTopic {
    pub group: String,
    pub message_type: MessageType,
    pub edge_node: String,
    pub device: Option<String>,
}

impl fmt::Display for SparkplugTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(
                f,
                "spBv1.0/{}/{}/{}/{}",
                self.group,
                self.message_type.as_str(),
                self.edge_node,
                device
            ),
            None => write!(f, "spBv1.0/{}/{}/{}", self.group, self.message_type.as_str(), self.edge_node),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic does not start with the spBv1.0 namespace")]
    WrongNamespace,
    #[error("topic has {0} segments, expected 4 or 5")]
    WrongSegmentCount(usize),
    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),
    #[error("device-scoped message type requires a device segment")]
    MissingDevice,
}

impl SparkplugTopic {
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.first() != Some(&"spBv1.0") {
            return Err(TopicError::WrongNamespace);
        }
        if segments.len() != 4 && segments.len() != 5 {
            return Err(TopicError::WrongSegmentCount(segments.len()));
        }
        let message_type = MessageType::from_str(segments[2])
            .ok_or_else(|| TopicError::UnknownMessageType(segments[2].to_string()))?;
        let device = segments.get(4).map(|s| s.to_string());
        if message_type.is_device_scoped() && device.is_none() {
            return Err(TopicError::MissingDevice);
        }
        Ok(Self {
            group: segments[1].to_string(),
            message_type,
            edge_node: segments[3].to_string(),
            device,
        })
    }
}

/// MQTT topic-filter matching with `+` (single level) and `#` (multi
/// level, must be the final segment) wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter_segments: Vec<&str> = filter.split('/').collect();
    let topic_segments: Vec<&str> = topic.split('/').collect();

    let mut fi = 0;
    let mut ti = 0;
    while fi < filter_segments.len() {
        match filter_segments[fi] {
            "#" => return true,
            "+" => {
                if ti >= topic_segments.len() {
                    return false;
                }
                fi += 1;
                ti += 1;
            }
            literal => {
                if ti >= topic_segments.len() || topic_segments[ti] != literal {
                    return false;
                }
                fi += 1;
                ti += 1;
            }
        }
    }
    ti == topic_segments.len()
}
