//! Items and their service-specific descriptors
//!
//! An [`ItemStream`] is one unit of remote data moving through a
//! collection: an ID, a byte reader, and a typed [`ItemInfo`] descriptor.
//! `ItemInfo` is a tagged variant rather than a trait object; consumers
//! pattern-match on the service tag.

use std::io::Read;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service-specific descriptor for a backed-up item.
///
/// Serialises externally tagged (`{"exchange": {...}}`), which is the
/// shape persisted inside backup details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemInfo {
    Exchange(ExchangeInfo),
    OneDrive(OneDriveInfo),
    SharePoint(SharePointInfo),
}

/// Descriptor for an Exchange item (mail, contact, or event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub sender: String,
    pub subject: String,
    pub received: DateTime<Utc>,
}

/// Descriptor for a OneDrive drive item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneDriveInfo {
    pub item_name: String,
    pub parent_path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// Descriptor for a SharePoint library or list item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharePointInfo {
    pub item_name: String,
    pub parent_path: String,
    pub size: u64,
}

impl ItemInfo {
    /// Human-oriented display name for the item.
    pub fn display_name(&self) -> &str {
        match self {
            ItemInfo::Exchange(info) => &info.subject,
            ItemInfo::OneDrive(info) => &info.item_name,
            ItemInfo::SharePoint(info) => &info.item_name,
        }
    }
}

/// A single item travelling through a collection channel.
///
/// The reader yields the item payload exactly once; closing it is the
/// consumer's responsibility. IDs are unique within their collection.
/// Synthetic items (backup metadata) carry no descriptor.
pub struct ItemStream {
    pub id: String,
    pub info: Option<ItemInfo>,
    pub data: Box<dyn Read + Send>,
}

impl ItemStream {
    /// Wraps an in-memory payload, the common case for API-fetched items.
    pub fn from_bytes(id: impl Into<String>, info: ItemInfo, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            info: Some(info),
            data: Box::new(std::io::Cursor::new(bytes)),
        }
    }

    /// Wraps a payload with no descriptor (synthetic metadata items).
    pub fn opaque(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            info: None,
            data: Box::new(std::io::Cursor::new(bytes)),
        }
    }
}

impl std::fmt::Debug for ItemStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemStream")
            .field("id", &self.id)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_info_serde_is_externally_tagged() {
        let info = ItemInfo::Exchange(ExchangeInfo {
            sender: "a@b.c".to_string(),
            subject: "hello".to_string(),
            received: "2026-01-02T03:04:05Z".parse().unwrap(),
        });

        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("exchange").is_some());

        let back: ItemInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_display_name_dispatches_on_tag() {
        let mail = ItemInfo::Exchange(ExchangeInfo {
            sender: "s".to_string(),
            subject: "subject line".to_string(),
            received: Utc::now(),
        });
        assert_eq!(mail.display_name(), "subject line");

        let file = ItemInfo::OneDrive(OneDriveInfo {
            item_name: "report.pdf".to_string(),
            parent_path: "/Documents".to_string(),
            size: 10,
            modified: None,
        });
        assert_eq!(file.display_name(), "report.pdf");
    }

    #[test]
    fn test_item_stream_reads_payload() {
        let mut item = ItemStream::from_bytes(
            "m1",
            ItemInfo::OneDrive(OneDriveInfo {
                item_name: "f".to_string(),
                parent_path: "/".to_string(),
                size: 4,
                modified: None,
            }),
            b"data".to_vec(),
        );

        let mut out = Vec::new();
        item.data.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"data");
    }
}
