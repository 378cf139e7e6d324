//! Nodes: the units of the feed list tree.

use crate::remote::RemoteSource;
use crate::rules::SearchFolder;
use crate::subscription::Subscription;

/// Stable node identifier, unique within the tree.
pub type NodeId = String;

/// What a node can do, derived purely from its kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub show_item_count: bool,
    pub show_unread_count: bool,
    /// Has a subscription that can be fetched.
    pub fetchable: bool,
    /// May contain children.
    pub foldable: bool,
    pub removable: bool,
}

/// Kind-specific payload of a node.
#[derive(Debug)]
pub enum NodeKind {
    Folder,
    Feed {
        subscription: Box<Subscription>,
    },
    SearchFolder {
        folder: SearchFolder,
    },
    /// Root of a remote account's subtree.
    SourceRoot {
        subscription: Box<Subscription>,
        source: RemoteSource,
    },
}

impl NodeKind {
    /// OPML `type` attribute value for this kind.
    pub fn type_str(&self) -> &'static str {
        match self {
            NodeKind::Folder => "folder",
            NodeKind::Feed { .. } => "rss",
            NodeKind::SearchFolder { .. } => "vfolder",
            NodeKind::SourceRoot { .. } => "source",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            NodeKind::Folder => Capabilities {
                show_unread_count: true,
                foldable: true,
                removable: true,
                ..Default::default()
            },
            NodeKind::Feed { .. } => Capabilities {
                show_item_count: true,
                show_unread_count: true,
                fetchable: true,
                removable: true,
                ..Default::default()
            },
            NodeKind::SearchFolder { .. } => Capabilities {
                show_item_count: true,
                show_unread_count: true,
                removable: true,
                ..Default::default()
            },
            NodeKind::SourceRoot { .. } => Capabilities {
                show_unread_count: true,
                fetchable: true,
                foldable: true,
                removable: true,
                ..Default::default()
            },
        }
    }
}

/// One node of the feed list.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
    /// Counter caches; the store rows are authoritative.
    pub item_count: u32,
    pub unread_count: u32,
    pub new_count: u32,
}

impl Node {
    pub fn new(id: NodeId, title: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id,
            title: title.into(),
            parent: None,
            children: Vec::new(),
            kind,
            item_count: 0,
            unread_count: 0,
            new_count: 0,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.kind.capabilities()
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        match &self.kind {
            NodeKind::Feed { subscription } | NodeKind::SourceRoot { subscription, .. } => {
                Some(subscription)
            }
            _ => None,
        }
    }

    pub fn subscription_mut(&mut self) -> Option<&mut Subscription> {
        match &mut self.kind {
            NodeKind::Feed { subscription } | NodeKind::SourceRoot { subscription, .. } => {
                Some(subscription)
            }
            _ => None,
        }
    }

    pub fn remote_source(&self) -> Option<&RemoteSource> {
        match &self.kind {
            NodeKind::SourceRoot { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn remote_source_mut(&mut self) -> Option<&mut RemoteSource> {
        match &mut self.kind {
            NodeKind::SourceRoot { source, .. } => Some(source),
            _ => None,
        }
    }
}
