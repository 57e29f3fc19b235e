use rustc_hash::FxHashMap;
use tracing::trace;
use crate::databins::databin::{Databin, DatabinId, DatabinKind};
use crate::error::{JpipError, JpipResult};
use crate::protocol::message_header::{DatabinClass, MessageHeader};

/// The databin cache of a session. All requests of the session write into it, and it is the
///  read surface for codestream reconstruction.
pub struct DatabinsSaver {
    is_tile_part_stream: bool,
    main_header: Databin,
    databins: FxHashMap<DatabinId, Databin>,
    max_pending_fragments: usize,
}

impl DatabinsSaver {
    pub fn new(is_tile_part_stream: bool, max_pending_fragments: usize) -> DatabinsSaver {
        DatabinsSaver {
            is_tile_part_stream,
            main_header: Databin::new(DatabinId::main_header(), max_pending_fragments),
            databins: Default::default(),
            max_pending_fragments,
        }
    }

    pub fn is_tile_part_stream(&self) -> bool {
        self.is_tile_part_stream
    }

    pub fn main_header_databin(&self) -> &Databin {
        &self.main_header
    }

    pub fn databin(&self, kind: DatabinKind, in_class_id: u64) -> Option<&Databin> {
        if kind == DatabinKind::MainHeader {
            return Some(&self.main_header);
        }
        self.databins.get(&DatabinId::new(kind, in_class_id))
    }

    pub fn num_databins(&self) -> usize {
        self.databins.len()
    }

    /// Writes the body of a parsed message into its databin. `all_bytes` is the response buffer
    ///  the header was parsed from.
    pub fn save_data(&mut self, header: &MessageHeader, all_bytes: &[u8]) -> JpipResult<()> {
        let kind = match self.databin_kind(header.class)? {
            Some(kind) => kind,
            None => {
                trace!("ignoring {:?} message for in-class id {}", header.class, header.in_class_id);
                return Ok(());
            }
        };

        let body = header.body(all_bytes)?;

        let databin = if kind == DatabinKind::MainHeader {
            &mut self.main_header
        }
        else {
            let id = DatabinId::new(kind, header.in_class_id);
            let max_pending_fragments = self.max_pending_fragments;
            self.databins.entry(id)
                .or_insert_with(|| Databin::new(id, max_pending_fragments))
        };

        trace!("saving {} bytes at offset {} to databin {}{}", body.len(), header.msg_offset, databin.id(),
            if header.is_last_byte_in_databin { " (last)" } else { "" });
        databin.write(header.msg_offset, body, header.is_last_byte_in_databin)
    }

    /// `None` for classes that are not cached
    fn databin_kind(&self, class: DatabinClass) -> JpipResult<Option<DatabinKind>> {
        use DatabinClass::*;

        let kind = match (class, self.is_tile_part_stream) {
            (MainHeader, _) => DatabinKind::MainHeader,
            (Metadata, _) => return Ok(None),
            (Tile | ExtendedTile, true) => DatabinKind::TilePart,
            (Precinct | ExtendedPrecinct, false) => DatabinKind::Precinct,
            (TileHeader, false) => DatabinKind::TileHeader,
            (class, true) => return Err(JpipError::protocol_violation(format!("{:?} message in a tile-part stream (jpt-stream)", class))),
            (class, false) => return Err(JpipError::protocol_violation(format!("{:?} message in a precinct stream (jpp-stream)", class))),
        };
        Ok(Some(kind))
    }
}
