//! Layout coordinator
//!
//! Top-level facade over one striped file: open, read, write, truncate,
//! sync, stat and close, plus on-the-fly reconstruction of erased blocks.
//! Only the entry server (the stripe whose physical index equals the
//! head index) runs the distributed path; every other node passes reads
//! and writes straight through to its local stripe.

use crate::error::{Error, Result};
use crate::metrics::LayoutMetrics;
use crate::raid::group::GroupBuffer;
use crate::raid::header::{StripeHeader, HEADER_SIZE};
use crate::raid::layout_id::LayoutId;
use crate::raid::opaque::{OpenOpaque, KEY_REPLICA_INDEX};
use crate::raid::parity::{scheme_for, GroupGeometry, ParityScheme};
use crate::raid::pieces::PieceMap;
use crate::raid::stripe_io::{OpenFlags, StripeIo, StripeIoFactory, StripeStat};
use crate::raid::validator::validate_headers;
use crate::raid::writer::StripeWriter;
use bytes::Bytes;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

struct StripeChannel {
    io: Arc<dyn StripeIo>,
    writer: Option<StripeWriter>,
}

impl std::fmt::Debug for LayoutCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutCoordinator")
            .field("layout", &self.layout)
            .field("is_open", &self.is_open)
            .field("is_rw", &self.is_rw)
            .finish()
    }
}

/// Open striped layout file
pub struct LayoutCoordinator {
    layout: LayoutId,
    scheme: Arc<dyn ParityScheme>,
    geometry: GroupGeometry,
    factory: Arc<dyn StripeIoFactory>,
    timeout: Duration,

    store_recovery: bool,
    is_rw: bool,
    is_open: bool,
    is_entry_server: bool,
    is_streaming: bool,
    do_truncate: bool,
    done_recovery: bool,

    physical_index: Option<u32>,
    file_size: u64,
    last_write_offset: u64,

    stripes: Vec<Option<StripeChannel>>,
    headers: Vec<StripeHeader>,
    map_lp: BTreeMap<u32, u32>,
    map_pl: BTreeMap<u32, u32>,

    pieces: PieceMap,
    group: GroupBuffer,
    metrics: LayoutMetrics,
    opaque: OpenOpaque,
}

impl LayoutCoordinator {
    /// Open a striped file.
    ///
    /// `path` opens the local stripe; the opaque carries this stripe's
    /// physical index, the entry-server index and the peer URLs. Under
    /// `store_recovery` the open is forced read-write and every repaired
    /// block or header is written back to its stripe.
    #[instrument(skip(factory, opaque), fields(path))]
    pub async fn open(
        factory: Arc<dyn StripeIoFactory>,
        layout: LayoutId,
        path: &str,
        mut flags: OpenFlags,
        opaque: &str,
        timeout: Duration,
        mut store_recovery: bool,
    ) -> Result<Self> {
        let scheme = scheme_for(&layout)?;
        let geometry = scheme.geometry();

        let mut opaque = OpenOpaque::parse(opaque)?;
        let stripe_head = opaque.replica_head()?;
        let physical_index = match opaque.get(KEY_REPLICA_INDEX) {
            Some(_) => Some(opaque.replica_index()?),
            None => None,
        };

        // Recovery needs write access to all stripes; a truncating
        // read-write open implies recovery mode
        if store_recovery {
            flags.read_write = true;
            flags.create = true;
        } else if flags.read_write && flags.truncate {
            store_recovery = true;
        }
        let is_rw = flags.read_write;
        let is_entry_server = physical_index == Some(stripe_head);

        opaque.augment(layout.stripe_width);

        let local = factory.open(path, flags, &opaque, timeout).await?;
        let local_header = StripeHeader::read_from(local.as_ref(), timeout).await;

        let mut coordinator = Self {
            layout,
            scheme,
            geometry,
            factory,
            timeout,
            store_recovery,
            is_rw,
            is_open: false,
            is_entry_server,
            is_streaming: true,
            do_truncate: false,
            done_recovery: false,
            physical_index,
            file_size: 0,
            last_write_offset: 0,
            stripes: Vec::new(),
            headers: Vec::new(),
            map_lp: BTreeMap::new(),
            map_pl: BTreeMap::new(),
            pieces: PieceMap::new(),
            group: GroupBuffer::new(geometry),
            metrics: LayoutMetrics::default(),
            opaque,
        };

        if is_entry_server {
            coordinator
                .open_entry_server(local, local_header, flags)
                .await?;
        } else {
            coordinator.headers.push(local_header);
            coordinator.stripes.push(Some(StripeChannel {
                io: local,
                writer: None,
            }));
            coordinator.map_lp.insert(0, 0);
            coordinator.map_pl.insert(0, 0);
            if coordinator.headers[0].is_valid() {
                coordinator.file_size = coordinator.headers[0].file_size(layout.stripe_width);
            }
        }

        coordinator.is_open = true;
        debug!(file_size = coordinator.file_size, "layout open finished");
        Ok(coordinator)
    }

    async fn open_entry_server(
        &mut self,
        local: Arc<dyn StripeIo>,
        local_header: StripeHeader,
        flags: OpenFlags,
    ) -> Result<()> {
        let nb_total = self.layout.nb_total();
        let own_index = self.physical_index.expect("entry server has an index");

        // Every stripe URL must be present before any open is attempted
        let mut remote_urls: Vec<Option<String>> = vec![None; nb_total as usize];
        for i in 0..nb_total {
            if i == own_index {
                continue;
            }
            let url = self.remote_url_for(i)?;
            remote_urls[i as usize] = Some(url);
        }

        // Open the remote stripes in parallel
        let opens = remote_urls.iter().enumerate().filter_map(|(i, url)| {
            url.as_ref().map(|url| {
                let factory = Arc::clone(&self.factory);
                let url = url.clone();
                let opaque = self.opaque.clone();
                let timeout = self.timeout;
                async move {
                    let opened = factory.open(&url, flags, &opaque, timeout).await;
                    (i, url, opened)
                }
            })
        });
        let mut opened: Vec<Option<Arc<dyn StripeIo>>> = vec![None; nb_total as usize];
        let mut nb_failed = 0usize;
        for (i, url, result) in join_all(opens).await {
            match result {
                Ok(io) => opened[i] = Some(io),
                Err(e) => {
                    warn!(stripe = i, url, error = %e, "failed to open remote stripe");
                    nb_failed += 1;
                }
            }
        }

        let tolerance = self.layout.nb_parity as usize;
        if nb_failed > tolerance || (self.store_recovery && nb_failed > 0) {
            return Err(Error::StripeOpenFailed {
                url: format!("{nb_failed} remote stripes"),
                reason: format!(
                    "more failed opens than the layout tolerates (store_recovery={})",
                    self.store_recovery
                ),
            });
        }

        // Assemble the physical stripe array, pairing each open stripe
        // with its header
        for i in 0..nb_total {
            if i == own_index {
                self.headers.push(local_header.clone());
                self.stripes.push(Some(StripeChannel {
                    io: Arc::clone(&local),
                    writer: None,
                }));
                continue;
            }
            match opened[i as usize].take() {
                Some(io) => {
                    let header = StripeHeader::read_from(io.as_ref(), self.timeout).await;
                    self.headers.push(header);
                    self.stripes.push(Some(StripeChannel { io, writer: None }));
                }
                None => {
                    self.headers.push(StripeHeader::invalid());
                    self.stripes.push(None);
                }
            }
        }

        let outcome = validate_headers(&mut self.headers, tolerance)?;
        self.map_lp = outcome.map_lp;
        self.map_pl = outcome.map_pl;
        if !outcome.repaired.is_empty() {
            self.done_recovery = true;
            self.metrics.headers_repaired.add(outcome.repaired.len() as u64);
            if self.store_recovery {
                for physical in outcome.repaired {
                    if let Some(stripe) = &self.stripes[physical] {
                        self.headers[physical]
                            .write_to(stripe.io.as_ref(), self.timeout)
                            .await?;
                    }
                }
            }
        }

        self.file_size = self.headers[0].file_size(self.layout.stripe_width);

        // Writers carry the deferred data and parity writes
        if self.is_rw {
            for stripe in self.stripes.iter_mut().flatten() {
                stripe.writer = Some(StripeWriter::new(Arc::clone(&stripe.io), self.timeout));
            }
        }
        Ok(())
    }

    /// Logical file size as the coordinator sees it
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// True if this node coordinates the distributed path
    pub fn is_entry_server(&self) -> bool {
        self.is_entry_server
    }

    /// Metrics of this open layout
    pub fn metrics(&self) -> &LayoutMetrics {
        &self.metrics
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Read `buf.len()` bytes at `offset`, reconstructing erased blocks
    /// on the fly. Returns the number of bytes read, clipped at the end
    /// of the file.
    #[instrument(skip(self, buf), fields(offset, len = buf.len()))]
    pub async fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }

        if !self.is_entry_server {
            let stripe = self.stripes[0].as_ref().ok_or(Error::NotOpen)?;
            return stripe.io.read_at(offset, buf, self.timeout).await;
        }

        if offset >= self.file_size {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(self.file_size - offset) as usize;
        if len == 0 {
            return Ok(0);
        }

        let errors = self.read_aligned(offset, &mut buf[..len]).await?;
        if !errors.is_empty() {
            self.recover_pieces(offset, &mut buf[..len], errors).await?;
        }

        self.metrics.bytes_read.add(len as u64);
        Ok(len)
    }

    /// Issue the aligned block reads for `[offset, offset + buf.len())`
    /// and return the per-range errors in logical coordinates
    async fn read_aligned(&self, offset: u64, buf: &mut [u8]) -> Result<BTreeMap<u64, u64>> {
        let width = self.layout.stripe_width;
        let w = width as usize;
        let len = buf.len();
        let end_raw = offset + len as u64;

        let aligned_offset = (offset / width) * width;
        let aligned_end = end_raw.div_ceil(width) * width;
        let nb_blocks = ((aligned_end - aligned_offset) / width) as usize;
        let head_partial = aligned_offset < offset;
        let tail_partial = aligned_end > end_raw;

        // Whole interior blocks land straight in the caller's buffer;
        // ragged edge blocks go through scratch blocks
        let mut first_block = vec![0u8; w];
        let mut last_block = vec![0u8; w];

        let mut dests: Vec<&mut [u8]> = Vec::with_capacity(nb_blocks);
        if nb_blocks == 1 {
            if head_partial || tail_partial {
                dests.push(&mut first_block[..]);
            } else {
                dests.push(&mut buf[..w]);
            }
        } else {
            let interior_start = if head_partial {
                (width - (offset - aligned_offset)) as usize
            } else {
                0
            };
            let nb_interior = nb_blocks - head_partial as usize - tail_partial as usize;
            if head_partial {
                dests.push(&mut first_block[..]);
            }
            for chunk in buf[interior_start..].chunks_mut(w).take(nb_interior) {
                dests.push(chunk);
            }
            if tail_partial {
                dests.push(&mut last_block[..]);
            }
        }

        // Per-block stripe routing
        struct BlockJob {
            io: Option<Arc<dyn StripeIo>>,
            global_offset: u64,
            local_offset: u64,
            expected: u64,
        }
        let jobs: Vec<BlockJob> = (0..nb_blocks)
            .map(|k| {
                let global_offset = aligned_offset + k as u64 * width;
                let (physical, local_offset) = self.local_position(global_offset);
                BlockJob {
                    io: self.stripes[physical as usize]
                        .as_ref()
                        .map(|s| Arc::clone(&s.io)),
                    global_offset,
                    local_offset,
                    expected: width.min(self.file_size - global_offset),
                }
            })
            .collect();

        let timeout = self.timeout;
        let reads = jobs.into_iter().zip(dests).map(|(job, dest)| async move {
            let outcome = match &job.io {
                Some(io) => io.read_at(job.local_offset, dest, timeout).await,
                None => Ok(0),
            };
            (job.global_offset, job.expected, outcome)
        });

        let mut errors = BTreeMap::new();
        for (global_offset, expected, outcome) in join_all(reads).await {
            let short = match outcome {
                Ok(n) => (n as u64) < expected,
                Err(e) => {
                    debug!(global_offset, error = %e, "stripe block read failed");
                    true
                }
            };
            if short {
                let (off, len) = matching_part(offset, len as u64, global_offset, width);
                errors.insert(off, len);
            }
        }

        // Fold the scratch blocks into the caller's buffer
        if nb_blocks == 1 {
            if head_partial || tail_partial {
                let start = (offset - aligned_offset) as usize;
                buf.copy_from_slice(&first_block[start..start + len]);
            }
        } else {
            if head_partial {
                let start = (offset - aligned_offset) as usize;
                buf[..w - start].copy_from_slice(&first_block[start..]);
            }
            if tail_partial {
                let last_offset = aligned_end - width;
                let n = (end_raw - last_offset) as usize;
                let dst = (last_offset - offset) as usize;
                buf[dst..].copy_from_slice(&last_block[..n]);
            }
        }

        Ok(errors)
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Write `buf` at `offset`. In streaming mode parity is computed as
    /// groups fill; out-of-order writes switch the file to sparse mode
    /// where parity is deferred to covered groups and to close.
    #[instrument(skip(self, buf), fields(offset, len = buf.len()))]
    pub async fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }

        if !self.is_entry_server {
            let stripe = self.stripes[0].as_ref().ok_or(Error::NotOpen)?;
            return stripe.io.write_at(offset, buf, self.timeout).await;
        }

        if self.is_streaming && offset != self.last_write_offset {
            debug!(offset, expected = self.last_write_offset, "switching to sparse mode");
            self.is_streaming = false;
        }

        let width = self.layout.stripe_width;
        let mut off = offset;
        let mut remaining = buf;
        while !remaining.is_empty() {
            let nwrite = ((width - off % width) as usize).min(remaining.len());
            let (chunk, rest) = remaining.split_at(nwrite);
            let (physical, local_offset) = self.local_position(off);

            // A missing stripe is skipped; its content is reconstructible
            // from parity as long as no more than P stripes are gone
            if let Some(stripe) = &self.stripes[physical as usize] {
                if let Some(writer) = &stripe.writer {
                    writer.enqueue(local_offset, Bytes::copy_from_slice(chunk));
                }
            }

            if self.is_streaming {
                let size_group = self.geometry.size_group();
                let group_offset = (off / size_group) * size_group;
                let small = ((off - group_offset) / width) as usize;
                let big = self.geometry.map_small_to_big(small);
                self.group.add_data_block(off, chunk, big);
                if self.group.is_complete() {
                    self.flush_group_parity().await?;
                }
            }
            self.pieces.add_piece(off, nwrite as u64);

            off += nwrite as u64;
            remaining = rest;
        }

        if !self.is_streaming {
            self.sparse_parity_computation(false).await?;
        }

        self.last_write_offset = offset + buf.len() as u64;
        if offset + buf.len() as u64 > self.file_size {
            self.file_size = offset + buf.len() as u64;
            self.do_truncate = true;
        }

        self.metrics.bytes_written.add(buf.len() as u64);
        Ok(buf.len())
    }

    /// Compute the parity of the buffered group and queue the parity
    /// writes, then drop the buffered data
    async fn flush_group_parity(&mut self) -> Result<()> {
        let Some(group_offset) = self.group.group_offset() else {
            return Ok(());
        };

        let scheme = Arc::clone(&self.scheme);
        scheme.compute_parity(&mut self.group)?;

        let width = self.layout.stripe_width;
        let nb_data = self.geometry.nb_data_files;
        let nb_total = self.geometry.nb_total_files();
        let first_line = group_offset / self.geometry.size_line();

        for line in 0..self.geometry.nb_lines() {
            for pos in nb_data..nb_total {
                let big = line * nb_total + pos;
                let physical = self.map_lp[&(pos as u32)];
                let local_offset = HEADER_SIZE + (first_line + line as u64) * width;
                if let Some(stripe) = &self.stripes[physical as usize] {
                    if let Some(writer) = &stripe.writer {
                        writer
                            .enqueue(local_offset, Bytes::copy_from_slice(self.group.block(big)));
                    }
                }
            }
        }

        self.metrics.parity_groups.inc();
        self.group.reset(group_offset);
        Ok(())
    }

    /// Compute parity for the sparse ranges whose groups are covered;
    /// with `force` every touched group is emitted, zero-padded
    async fn sparse_parity_computation(&mut self, force: bool) -> Result<()> {
        if self.pieces.is_empty() {
            return Ok(());
        }
        self.pieces.merge();
        let groups = self
            .pieces
            .offset_groups(self.geometry.size_group(), force);

        for group_offset in groups {
            self.read_group(group_offset).await?;
            self.flush_group_parity().await?;
        }
        Ok(())
    }

    /// Load every data block of the group at `group_offset` into the
    /// group buffer, waiting out the queued writes first
    async fn read_group(&mut self, group_offset: u64) -> Result<()> {
        self.wait_all_writers().await?;

        let width = self.layout.stripe_width;
        self.group.reset(group_offset);
        for small in 0..self.geometry.nb_data_blocks {
            let global_offset = group_offset + small as u64 * width;
            let expected = width.min(self.file_size.saturating_sub(global_offset));
            if expected == 0 {
                continue;
            }

            let (physical, local_offset) = self.local_position(global_offset);
            let stripe = self.stripes[physical as usize].as_ref().ok_or_else(|| {
                Error::Internal(format!(
                    "stripe {physical} unavailable for parity computation"
                ))
            })?;

            // Unwritten tails read short and stay zero
            let mut block = vec![0u8; width as usize];
            stripe
                .io
                .read_at(local_offset, &mut block, self.timeout)
                .await?;
            let big = self.geometry.map_small_to_big(small);
            self.group.add_data_block(global_offset, &block, big);
        }
        Ok(())
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Recover the erased ranges in `errors`, group by group, writing the
    /// reconstructed bytes into `buf` (whose first byte corresponds to
    /// file offset `offset_init`)
    async fn recover_pieces(
        &mut self,
        offset_init: u64,
        buf: &mut [u8],
        mut errors: BTreeMap<u64, u64>,
    ) -> Result<()> {
        let size_group = self.geometry.size_group();
        while let Some((&first, _)) = errors.iter().next() {
            let group_offset = (first / size_group) * size_group;
            let group_end = group_offset + size_group;
            let mut in_group = BTreeMap::new();
            while let Some((&off, &len)) = errors.range(..group_end).next() {
                errors.remove(&off);
                in_group.insert(off, len);
            }
            self.recover_group(group_offset, offset_init, buf, &in_group)
                .await?;
        }
        self.done_recovery = true;
        Ok(())
    }

    /// Reconstruct one parity group and serve the requested ranges from
    /// the rebuilt cells
    async fn recover_group(
        &mut self,
        group_offset: u64,
        offset_init: u64,
        buf: &mut [u8],
        errors: &BTreeMap<u64, u64>,
    ) -> Result<()> {
        self.wait_all_writers().await?;

        let width = self.layout.stripe_width;
        let nb_total_blocks = self.geometry.nb_total_blocks;
        let nb_data = self.geometry.nb_data_files;
        let first_line = group_offset / self.geometry.size_line();

        // Read every cell of the group; whatever fails to read is an
        // erasure for the parity scheme to fill back in
        let mut cells: Vec<Option<Vec<u8>>> = Vec::with_capacity(nb_total_blocks);
        for big in 0..nb_total_blocks {
            let (line, pos) = self.geometry.big_position(big);
            let physical = self.map_lp[&(pos as u32)];
            let local_offset = HEADER_SIZE + (first_line + line as u64) * width;

            let expected = if pos < nb_data {
                let small = line * nb_data + pos;
                let global_offset = group_offset + small as u64 * width;
                width.min(self.file_size.saturating_sub(global_offset))
            } else if group_offset < self.file_size {
                width
            } else {
                0
            };

            if expected == 0 {
                cells.push(Some(vec![0u8; width as usize]));
                continue;
            }

            let cell = match &self.stripes[physical as usize] {
                None => None,
                Some(stripe) => {
                    let mut block = vec![0u8; width as usize];
                    match stripe.io.read_at(local_offset, &mut block, self.timeout).await {
                        Ok(n) if (n as u64) >= expected => Some(block),
                        Ok(_) | Err(_) => None,
                    }
                }
            };
            cells.push(cell);
        }

        let erased: Vec<usize> = (0..nb_total_blocks)
            .filter(|&big| cells[big].is_none())
            .collect();
        self.scheme
            .reconstruct(&mut cells)
            .map_err(|e| Error::UnrecoverableGroup {
                group_offset,
                nb_erased: e.nb_erased,
                tolerance: e.tolerance,
            })?;

        // Serve the requested ranges from the rebuilt group
        for (&err_offset, &err_len) in errors {
            let mut cur = err_offset;
            let end = err_offset + err_len;
            while cur < end {
                let small = ((cur - group_offset) / width) as usize;
                let big = self.geometry.map_small_to_big(small);
                let in_block = (cur % width) as usize;
                let n = ((width as usize - in_block) as u64).min(end - cur) as usize;
                let dst = (cur - offset_init) as usize;
                let cell = cells[big].as_ref().expect("reconstructed cell");
                buf[dst..dst + n].copy_from_slice(&cell[in_block..in_block + n]);
                cur += n as u64;
            }
        }

        // Under store-recovery the rebuilt blocks go back to their stripes
        if self.store_recovery {
            for big in erased {
                let (line, pos) = self.geometry.big_position(big);
                let physical = self.map_lp[&(pos as u32)];
                let local_offset = HEADER_SIZE + (first_line + line as u64) * width;
                if let Some(stripe) = &self.stripes[physical as usize] {
                    let cell = cells[big].as_ref().expect("reconstructed cell");
                    stripe
                        .io
                        .write_at(local_offset, cell, self.timeout)
                        .await?;
                }
            }
        }

        self.metrics.recoveries.inc();
        info!(group_offset, "recovered parity group");
        Ok(())
    }

    /// Proactively repair the whole file, group by group. Requires the
    /// entry server in store-recovery mode; used right after open.
    #[instrument(skip(self))]
    pub async fn recover_content(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }
        if !self.is_entry_server || !self.store_recovery {
            return Err(Error::Internal(
                "content recovery runs on the entry server in recovery mode".to_string(),
            ));
        }

        let width = self.layout.stripe_width;
        let size_group = self.geometry.size_group();
        let nb_groups = self.file_size.div_ceil(size_group);
        let mut scratch = vec![0u8; size_group as usize];

        for group_index in 0..nb_groups {
            let group_offset = group_index * size_group;
            let mut errors = BTreeMap::new();
            for small in 0..self.geometry.nb_data_blocks {
                let global_offset = group_offset + small as u64 * width;
                let expected = width.min(self.file_size.saturating_sub(global_offset));
                if expected > 0 {
                    errors.insert(global_offset, expected);
                }
            }
            self.recover_group(group_offset, group_offset, &mut scratch, &errors)
                .await?;
        }
        self.done_recovery = true;
        Ok(())
    }

    // =========================================================================
    // Maintenance operations
    // =========================================================================

    /// Truncate the logical file to `size` bytes
    pub async fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }

        if !self.is_entry_server {
            let stripe = self.stripes[0].as_ref().ok_or(Error::NotOpen)?;
            return stripe.io.truncate(size, self.timeout).await;
        }

        // Stripes keep whole parity groups; the logical size lives in the
        // headers
        let local_size = HEADER_SIZE
            + size.div_ceil(self.geometry.size_group()) * self.geometry.nb_lines() as u64
                * self.layout.stripe_width;
        for stripe in self.stripes.iter().flatten() {
            stripe.io.truncate(local_size, self.timeout).await?;
        }
        self.file_size = size;
        Ok(())
    }

    /// Flush all queued writes and sync every stripe
    pub async fn sync(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }
        self.wait_all_writers().await?;
        for stripe in self.stripes.iter().flatten() {
            stripe.io.sync(self.timeout).await?;
        }
        Ok(())
    }

    /// Remove every stripe file of the layout
    pub async fn remove(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }
        let mut first_error = None;
        for stripe in self.stripes.iter().flatten() {
            if let Err(e) = stripe.io.remove(self.timeout).await {
                warn!(error = %e, "failed to remove stripe");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stat the layout.
    ///
    /// The reported size is always the coordinator's logical file size,
    /// never a stripe's on-disk size; clients stat files that are still
    /// being written through this very coordinator.
    pub async fn stat(&self) -> Result<StripeStat> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }
        for stripe in self.stripes.iter().flatten() {
            if stripe.io.stat(self.timeout).await.is_ok() {
                return Ok(StripeStat {
                    size: self.file_size,
                });
            }
        }
        Err(Error::Internal("no stripe could be stated".to_string()))
    }

    /// Close the layout: emit outstanding parity, settle all queued
    /// writes, rewrite the headers, and close every stripe
    #[instrument(skip(self))]
    pub async fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }
        let mut first_error: Option<Error> = None;
        let mut note = |e: Error| {
            warn!(error = %e, "error during layout close");
            first_error.get_or_insert(e);
        };

        if self.is_entry_server && self.store_recovery {
            if self.done_recovery || self.do_truncate {
                self.do_truncate = false;
                self.done_recovery = false;
                if let Err(e) = self.truncate(self.file_size).await {
                    note(e);
                }
            }

            if self.is_streaming {
                if self.group.has_data() {
                    if let Err(e) = self.flush_group_parity().await {
                        note(e);
                    }
                }
            } else if let Err(e) = self.sparse_parity_computation(true).await {
                note(e);
            }

            if let Err(e) = self.wait_all_writers().await {
                note(e);
            }

            if let Err(e) = self.update_headers().await {
                note(e);
            }
        }

        // Shut down the writer tasks before closing the stripes
        for stripe in self.stripes.iter_mut().flatten() {
            if let Some(writer) = stripe.writer.take() {
                if !writer.shutdown().await {
                    note(Error::Internal("queued writes failed at close".to_string()));
                }
            }
        }

        if self.is_entry_server {
            let own = self.physical_index.unwrap_or(0) as usize;
            let mut nb_failed = 0usize;
            for (physical, stripe) in self.stripes.iter().enumerate() {
                if physical == own {
                    continue;
                }
                if let Some(stripe) = stripe {
                    if let Err(e) = stripe.io.close(self.timeout).await {
                        warn!(stripe = physical, error = %e, "failed to close remote stripe");
                        nb_failed += 1;
                    }
                }
            }
            if nb_failed > self.layout.nb_parity as usize {
                note(Error::Internal(format!(
                    "{nb_failed} remote stripes failed to close"
                )));
            }
            if let Some(stripe) = &self.stripes[own] {
                if let Err(e) = stripe.io.close(self.timeout).await {
                    note(e);
                }
            }
        } else if let Some(stripe) = &self.stripes[0] {
            if let Err(e) = stripe.io.close(self.timeout).await {
                note(e);
            }
        }

        self.is_open = false;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Bring every header up to date with the final file size and its
    /// stripe's logical id, and persist them all
    async fn update_headers(&mut self) -> Result<()> {
        let (nb_blocks, last_block_size) =
            StripeHeader::blocks_for_size(self.file_size, self.layout.stripe_width);

        let mut update_header = false;
        for header in &mut self.headers {
            if header.nb_blocks() != nb_blocks {
                header.set_nb_blocks(nb_blocks);
                update_header = true;
            }
            if header.last_block_size() != last_block_size {
                header.set_last_block_size(last_block_size);
                update_header = true;
            }
        }
        if !update_header {
            return Ok(());
        }

        let mut first_error = None;
        for (physical, header) in self.headers.iter_mut().enumerate() {
            header.set_stripe_id(self.map_pl[&(physical as u32)]);
            header.set_valid(true);
            match &self.stripes[physical] {
                Some(stripe) => {
                    if let Err(e) = header.write_to(stripe.io.as_ref(), self.timeout).await {
                        warn!(stripe = physical, error = %e, "failed to write stripe header");
                        first_error.get_or_insert(e);
                    }
                }
                None => {
                    warn!(stripe = physical, "cannot write header to unopened stripe");
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Physical stripe slot and stripe-local byte offset of the block
    /// containing the global file offset `off`
    fn local_position(&self, off: u64) -> (u32, u64) {
        let width = self.layout.stripe_width;
        let logical = ((off / width) % self.geometry.nb_data_files as u64) as u32;
        let physical = self.map_lp[&logical];
        let local = HEADER_SIZE + (off / self.geometry.size_line()) * width + off % width;
        (physical, local)
    }

    fn remote_url_for(&self, i: u32) -> Result<String> {
        self.opaque.remote_url(i)
    }

    async fn wait_all_writers(&self) -> Result<()> {
        for (physical, stripe) in self.stripes.iter().enumerate() {
            if let Some(stripe) = stripe {
                if let Some(writer) = &stripe.writer {
                    if !writer.wait_ok().await {
                        let nb_failed = writer.errors_map().len();
                        writer.reset();
                        return Err(Error::WriteBackFailed {
                            stripe: physical,
                            nb_failed,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Clip a block at `block_offset` to the requested `[offset,
/// offset + length)` range
fn matching_part(offset: u64, length: u64, block_offset: u64, width: u64) -> (u64, u64) {
    let start = block_offset.max(offset);
    let end = (block_offset + width).min(offset + length);
    (start, end - start)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_part_clips_to_request() {
        // Request [100, 300), blocks of 128
        assert_eq!(matching_part(100, 200, 0, 128), (100, 28));
        assert_eq!(matching_part(100, 200, 128, 128), (128, 128));
        assert_eq!(matching_part(100, 200, 256, 128), (256, 44));
    }

    #[test]
    fn test_matching_part_interior_block_is_whole() {
        assert_eq!(matching_part(0, 512, 128, 128), (128, 128));
    }
}
