//! Lookup tables built from the enumerated streams.
//!
//! Types are reconciled against [`DSType`] by exact name. Blobs and instances
//! stay keyed by remote type id; a local lookup goes `DSType` to remote id to
//! entry.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::entity::{enum_blobs, enum_instances, enum_types, RemoteType};
use super::stream::StreamSet;
use crate::config::ReaderConfig;
use crate::ds_type::DSType;
use crate::error::{ReaderError, ReaderResult};
use crate::types::{Address, TargetLayout};

/// Immutable tables for one parsed context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractTables
{
    types: Vec<RemoteType>,
    index_by_id: HashMap<u16, usize>,
    index_by_name: HashMap<String, usize>,
    remote_to_local: HashMap<u16, DSType>,
    details_by_local: HashMap<DSType, usize>,
    blobs: HashMap<u16, Vec<u8>>,
    instances: HashMap<u16, Address>,
}

impl ContractTables
{
    /// Enumerate all streams and reconcile types.
    ///
    /// Nothing is returned unless every stream enumerates cleanly.
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::EnumerationFailure`] for malformed entities, two
    /// types sharing a numeric id, or a `Ptr` type whose size is not the
    /// negotiated pointer width.
    pub fn build(streams: &StreamSet, layout: &TargetLayout, config: &ReaderConfig) -> ReaderResult<Self>
    {
        let mut tables = Self::default();

        enum_types(&streams.types, layout, |remote| tables.insert_type(remote))?;
        tables.reconcile(layout, config)?;

        enum_blobs(&streams.blobs, layout, |blob| {
            if tables.blobs.contains_key(&blob.type_id) {
                debug!(type_id = blob.type_id, "ignoring older blob");
            } else {
                tables.blobs.insert(blob.type_id, blob.data.to_vec());
            }
            Ok(())
        })?;

        enum_instances(&streams.instances, layout, |instance| {
            if tables.instances.contains_key(&instance.type_id) {
                debug!(type_id = instance.type_id, "ignoring older instance");
            } else {
                tables.instances.insert(instance.type_id, instance.address);
            }
            Ok(())
        })?;

        debug!(
            types = tables.types.len(),
            mapped = tables.details_by_local.len(),
            blobs = tables.blobs.len(),
            instances = tables.instances.len(),
            "contract tables built"
        );
        Ok(tables)
    }

    fn insert_type(&mut self, remote: RemoteType) -> ReaderResult<()>
    {
        if self.index_by_id.contains_key(&remote.id) {
            return Err(ReaderError::enumeration(
                "types",
                format!("type id {} is published twice", remote.id),
            ));
        }
        if self.index_by_name.contains_key(&remote.name) {
            warn!(name = %remote.name, id = remote.id, "ignoring duplicate remote type name");
            return Ok(());
        }
        let index = self.types.len();
        self.index_by_id.insert(remote.id, index);
        self.index_by_name.insert(remote.name.clone(), index);
        self.types.push(remote);
        Ok(())
    }

    fn reconcile(&mut self, layout: &TargetLayout, config: &ReaderConfig) -> ReaderResult<()>
    {
        for (index, remote) in self.types.iter().enumerate() {
            let Some(local) = DSType::from_name(&remote.name) else {
                debug!(name = %remote.name, id = remote.id, "skipping unknown remote type");
                continue;
            };
            if remote.version != local.version() {
                warn!(
                    %local,
                    expected = local.version(),
                    found = remote.version,
                    strict = config.strict_versions,
                    "remote type version mismatch"
                );
                if config.strict_versions {
                    continue;
                }
            }
            if local == DSType::Ptr && remote.size != layout.pointer_size() as u64 {
                return Err(ReaderError::enumeration(
                    "types",
                    format!(
                        "Ptr has size {} but the target uses {} pointers",
                        remote.size, layout.pointer_width
                    ),
                ));
            }
            self.remote_to_local.insert(remote.id, local);
            self.details_by_local.insert(local, index);
        }
        Ok(())
    }

    /// Every remote type in enumeration order, mapped or not
    pub fn remote_types(&self) -> impl Iterator<Item = &RemoteType>
    {
        self.types.iter()
    }

    /// Remote type by numeric id
    #[must_use]
    pub fn remote_type(&self, id: u16) -> Option<&RemoteType>
    {
        self.index_by_id.get(&id).map(|&index| &self.types[index])
    }

    /// Remote type by exact name
    #[must_use]
    pub fn remote_type_by_name(&self, name: &str) -> Option<&RemoteType>
    {
        self.index_by_name.get(name).map(|&index| &self.types[index])
    }

    /// Local type a remote id was mapped to
    #[must_use]
    pub fn local_type(&self, remote_id: u16) -> Option<DSType>
    {
        self.remote_to_local.get(&remote_id).copied()
    }

    /// Details of the remote type mapped to `local`
    #[must_use]
    pub fn type_details(&self, local: DSType) -> Option<&RemoteType>
    {
        self.details_by_local.get(&local).map(|&index| &self.types[index])
    }

    /// Remote id mapped to `local`
    #[must_use]
    pub fn remote_id(&self, local: DSType) -> Option<u16>
    {
        self.type_details(local).map(|remote| remote.id)
    }

    /// Blob bytes for `local`
    #[must_use]
    pub fn blob(&self, local: DSType) -> Option<&[u8]>
    {
        self.remote_id(local)
            .and_then(|id| self.blobs.get(&id))
            .map(Vec::as_slice)
    }

    /// Instance address for `local`
    #[must_use]
    pub fn instance(&self, local: DSType) -> Option<Address>
    {
        self.remote_id(local).and_then(|id| self.instances.get(&id).copied())
    }

    /// Number of blobs, including ones for unmapped types
    #[must_use]
    pub fn blob_count(&self) -> usize
    {
        self.blobs.len()
    }
}
