// src/capability.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Static per-backend capability declarations.

use std::fmt;

/// An optional feature a backend may or may not offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Acl,
    Metadata,
    PresignedUrl,
    SameCopy,
    SameMove,
    MultipartUpload,
    ListParts,
    PartCopy,
    Listing,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::Acl,
        Capability::Metadata,
        Capability::PresignedUrl,
        Capability::SameCopy,
        Capability::SameMove,
        Capability::MultipartUpload,
        Capability::ListParts,
        Capability::PartCopy,
        Capability::Listing,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Acl => "acl",
            Capability::Metadata => "metadata",
            Capability::PresignedUrl => "presigned-url",
            Capability::SameCopy => "same-copy",
            Capability::SameMove => "same-move",
            Capability::MultipartUpload => "multipart-upload",
            Capability::ListParts => "list-parts",
            Capability::PartCopy => "part-copy",
            Capability::Listing => "listing",
        };
        f.write_str(name)
    }
}

/// What a backend declares it can do. Built once when the adapter is
/// constructed and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilityDescriptor {
    pub acl: bool,
    pub metadata: bool,
    pub presigned_url: bool,
    pub same_copy: bool,
    pub same_move: bool,
    pub multipart_upload: bool,
    pub list_parts: bool,
    /// Server-side range copy into a multipart part.
    pub part_copy: bool,
    pub listing: bool,
    /// Largest part number a session accepts; 0 means unbounded.
    pub max_parts: u32,
    /// Largest page `list_objects` returns; 0 means unbounded.
    pub max_list_entries: usize,
    /// Smallest size accepted for any part except the last.
    pub min_part_size: u64,
}

impl CapabilityDescriptor {
    /// Only the required primitives: put, get, delete, head.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Every optional feature, with no limits.
    pub fn full() -> Self {
        Self {
            acl: true,
            metadata: true,
            presigned_url: true,
            same_copy: true,
            same_move: true,
            multipart_upload: true,
            list_parts: true,
            part_copy: true,
            listing: true,
            max_parts: 0,
            max_list_entries: 0,
            min_part_size: 0,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Acl => self.acl,
            Capability::Metadata => self.metadata,
            Capability::PresignedUrl => self.presigned_url,
            Capability::SameCopy => self.same_copy,
            Capability::SameMove => self.same_move,
            Capability::MultipartUpload => self.multipart_upload,
            Capability::ListParts => self.multipart_upload && self.list_parts,
            Capability::PartCopy => self.multipart_upload && self.part_copy,
            Capability::Listing => self.listing,
        }
    }
}
