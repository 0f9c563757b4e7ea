//! RAID layout integration tests
//!
//! End-to-end coverage of the striped layout over file-backed stripes:
//! round trips, header agreement, erasure tolerance, sparse parity and
//! proactive recovery.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stratastor::error::Error;
use stratastor::raid::{
    ChecksumKind, FaultyStripeFactory, FileStripeFactory, IoKind, LayoutCoordinator, LayoutId,
    OpenFlags, Scheme, StripeHeader, StripeIoFactory, HEADER_SIZE,
};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .try_init();
    });
}

const TIMEOUT: Duration = Duration::from_secs(10);
const WIDTH: u64 = 128;

struct Fixture {
    _dir: tempfile::TempDir,
    layout: LayoutId,
    factory: Arc<FaultyStripeFactory>,
    local_path: String,
    opaque: String,
    stripe_paths: Vec<String>,
}

impl Fixture {
    fn new(scheme: Scheme, nb_data: u32, nb_parity: u32) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let layout = LayoutId::new(
            scheme,
            nb_data,
            nb_parity,
            WIDTH,
            ChecksumKind::Crc32,
            IoKind::Local,
        )
        .unwrap();

        let nb_total = layout.nb_total();
        let mut opaque = "mgm.replicaindex=0&mgm.replicahead=0&mgm.path=/f".to_string();
        let mut stripe_paths = Vec::new();
        for i in 0..nb_total {
            let stripe_dir = dir.path().join(format!("stripe{i}"));
            std::fs::create_dir(&stripe_dir).unwrap();
            opaque.push_str(&format!("&mgm.url{i}={}", stripe_dir.display()));
            stripe_paths.push(stripe_dir.join("f").display().to_string());
        }

        Self {
            local_path: stripe_paths[0].clone(),
            layout,
            factory: Arc::new(FaultyStripeFactory::new(Arc::new(FileStripeFactory))),
            opaque,
            stripe_paths,
            _dir: dir,
        }
    }

    async fn open_rw(&self) -> LayoutCoordinator {
        LayoutCoordinator::open(
            self.factory.clone() as Arc<dyn StripeIoFactory>,
            self.layout,
            &self.local_path,
            OpenFlags::read_write_truncate(),
            &self.opaque,
            TIMEOUT,
            false,
        )
        .await
        .unwrap()
    }

    async fn open_ro(&self) -> stratastor::Result<LayoutCoordinator> {
        LayoutCoordinator::open(
            self.factory.clone() as Arc<dyn StripeIoFactory>,
            self.layout,
            &self.local_path,
            OpenFlags::read_only(),
            &self.opaque,
            TIMEOUT,
            false,
        )
        .await
    }

    async fn open_recovery(&self) -> stratastor::Result<LayoutCoordinator> {
        LayoutCoordinator::open(
            self.factory.clone() as Arc<dyn StripeIoFactory>,
            self.layout,
            &self.local_path,
            OpenFlags::read_write(),
            &self.opaque,
            TIMEOUT,
            true,
        )
        .await
    }

    fn header_of(&self, stripe: usize) -> StripeHeader {
        let bytes = std::fs::read(&self.stripe_paths[stripe]).unwrap();
        StripeHeader::decode(&bytes)
    }

    fn corrupt_header(&self, stripe: usize) {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.stripe_paths[stripe])
            .unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&[0xffu8; 64]).unwrap();
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// Open Scenarios
// =============================================================================

#[tokio::test]
async fn test_two_stripe_open_with_all_headers_zeroed() {
    let fx = Fixture::new(Scheme::ReedSolomon, 1, 1);

    // Pre-create both stripe files with zeroed headers
    for path in &fx.stripe_paths {
        std::fs::write(path, vec![0u8; HEADER_SIZE as usize]).unwrap();
    }

    let layout = fx.open_ro().await.unwrap();
    assert_eq!(layout.file_size(), 0);
    assert!(layout.is_entry_server());

    let mut buf = [0u8; 16];
    let mut layout = layout;
    assert_eq!(layout.read(0, &mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_headers_agree_after_close() {
    let fx = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let mut layout = fx.open_rw().await;

    let data = vec![0xab; (5 * WIDTH) as usize];
    layout.write(0, &data).await.unwrap();
    layout.close().await.unwrap();

    // All headers valid, identical block counts, and the stripe ids form
    // a bijection
    let mut seen_ids = std::collections::BTreeSet::new();
    for stripe in 0..3 {
        let header = fx.header_of(stripe);
        assert!(header.is_valid(), "stripe {stripe}");
        assert_eq!(header.file_size(WIDTH), 5 * WIDTH);
        // 5 blocks of data, block-aligned, so one extra empty block
        assert_eq!(header.nb_blocks(), 6);
        assert_eq!(header.last_block_size(), 0);
        seen_ids.insert(header.stripe_id());
    }
    assert_eq!(seen_ids, (0..3).collect());
}

// =============================================================================
// Round Trips
// =============================================================================

#[tokio::test]
async fn test_streaming_round_trip() {
    let fx = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let data = pattern((7 * WIDTH + 53) as usize);

    let mut layout = fx.open_rw().await;
    layout.write(0, &data).await.unwrap();
    layout.close().await.unwrap();

    let mut layout = fx.open_ro().await.unwrap();
    assert_eq!(layout.file_size(), data.len() as u64);
    let mut out = vec![0u8; data.len()];
    assert_eq!(layout.read(0, &mut out).await.unwrap(), data.len());
    assert_eq!(out, data);
    layout.close().await.unwrap();
}

#[tokio::test]
async fn test_dual_parity_round_trip() {
    let fx = Fixture::new(Scheme::DualParity, 4, 2);
    let data = pattern((3 * 16 * WIDTH) as usize);

    let mut layout = fx.open_rw().await;
    layout.write(0, &data).await.unwrap();
    layout.close().await.unwrap();

    let mut layout = fx.open_ro().await.unwrap();
    let mut out = vec![0u8; data.len()];
    layout.read(0, &mut out).await.unwrap();
    assert_eq!(out, data);
    layout.close().await.unwrap();
}

#[tokio::test]
async fn test_unaligned_reads_return_clipped_aligned_content() {
    let fx = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let data = pattern((4 * WIDTH) as usize);

    let mut layout = fx.open_rw().await;
    layout.write(0, &data).await.unwrap();
    layout.close().await.unwrap();

    let mut layout = fx.open_ro().await.unwrap();
    for (offset, len) in [
        (0u64, 1usize),
        (1, 10),
        (WIDTH - 1, 2),
        (WIDTH + 7, (2 * WIDTH) as usize),
        (3 * WIDTH + 5, WIDTH as usize), // clipped at end of file
        (17, (3 * WIDTH) as usize),
    ] {
        let mut out = vec![0u8; len];
        let nread = layout.read(offset, &mut out).await.unwrap();
        let expected_len = len.min((data.len() as u64 - offset) as usize);
        assert_eq!(nread, expected_len, "offset={offset} len={len}");
        assert_eq!(
            &out[..nread],
            &data[offset as usize..offset as usize + nread],
            "offset={offset} len={len}"
        );
    }
    layout.close().await.unwrap();
}

#[tokio::test]
async fn test_writes_extend_file_size_and_stat() {
    let fx = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let mut layout = fx.open_rw().await;

    layout.write(0, &pattern(100)).await.unwrap();
    assert_eq!(layout.file_size(), 100);
    let stat = layout.stat().await.unwrap();
    assert_eq!(stat.size, 100);
    layout.close().await.unwrap();
}

// =============================================================================
// Erasure Tolerance
// =============================================================================

#[tokio::test]
async fn test_recovers_erased_stripe_on_read() {
    let fx = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let data = vec![0xab; (5 * WIDTH) as usize];

    let mut layout = fx.open_rw().await;
    layout.write(0, &data).await.unwrap();
    layout.close().await.unwrap();

    // Corrupt one data stripe: its header on disk and all of its reads
    fx.corrupt_header(1);
    fx.factory.fail_reads_on("stripe1/f");

    let mut layout = fx.open_ro().await.unwrap();
    assert_eq!(layout.file_size(), data.len() as u64);
    let mut out = vec![0u8; data.len()];
    layout.read(0, &mut out).await.unwrap();
    assert_eq!(out, data);
    layout.close().await.unwrap();
}

#[tokio::test]
async fn test_more_erasures_than_parity_fail_with_unrecoverable() {
    let fx = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let data = pattern((4 * WIDTH) as usize);

    let mut layout = fx.open_rw().await;
    layout.write(0, &data).await.unwrap();
    layout.close().await.unwrap();

    // Two erased stripes exceed P = 1; headers stay readable so the open
    // itself succeeds
    fx.factory
        .fail_read_range("stripe0/f", HEADER_SIZE, u64::MAX - HEADER_SIZE);
    fx.factory
        .fail_read_range("stripe1/f", HEADER_SIZE, u64::MAX - HEADER_SIZE);

    let mut layout = fx.open_ro().await.unwrap();
    let mut out = vec![0u8; data.len()];
    let err = layout.read(0, &mut out).await.unwrap_err();
    assert!(matches!(err, Error::UnrecoverableGroup { .. }), "{err}");
}

#[tokio::test]
async fn test_dual_parity_survives_two_erased_stripes() {
    let fx = Fixture::new(Scheme::DualParity, 4, 2);
    let data = pattern((2 * 16 * WIDTH) as usize);

    let mut layout = fx.open_rw().await;
    layout.write(0, &data).await.unwrap();
    layout.close().await.unwrap();

    fx.corrupt_header(1);
    fx.factory.fail_reads_on("stripe1/f");
    // The second loss is the horizontal parity stripe
    fx.factory
        .fail_read_range("stripe4/f", HEADER_SIZE, u64::MAX - HEADER_SIZE);

    let mut layout = fx.open_ro().await.unwrap();
    let mut out = vec![0u8; data.len()];
    layout.read(0, &mut out).await.unwrap();
    assert_eq!(out, data);
    layout.close().await.unwrap();
}

#[tokio::test]
async fn test_too_many_corrupt_headers_fail_the_open() {
    let fx = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let mut layout = fx.open_rw().await;
    layout.write(0, &pattern(256)).await.unwrap();
    layout.close().await.unwrap();

    fx.corrupt_header(0);
    fx.corrupt_header(2);

    let err = fx.open_ro().await.unwrap_err();
    assert!(matches!(err, Error::HeadersInvalid { .. }), "{err}");
}

#[tokio::test]
async fn test_recover_content_writes_blocks_back() {
    let fx = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let data = pattern((4 * WIDTH) as usize);

    let mut layout = fx.open_rw().await;
    layout.write(0, &data).await.unwrap();
    layout.close().await.unwrap();

    // Zero out one data block on disk, then mark it unreadable
    let victim_local_offset = HEADER_SIZE; // first block of stripe 1
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&fx.stripe_paths[1])
            .unwrap();
        file.seek(SeekFrom::Start(victim_local_offset)).unwrap();
        file.write_all(&vec![0u8; WIDTH as usize]).unwrap();
    }
    fx.factory
        .fail_read_range("stripe1/f", victim_local_offset, WIDTH);

    let mut layout = fx.open_recovery().await.unwrap();
    layout.recover_content().await.unwrap();
    layout.close().await.unwrap();

    // The reconstructed block was stored back to the stripe file
    fx.factory.heal();
    let stripe = std::fs::read(&fx.stripe_paths[1]).unwrap();
    let start = victim_local_offset as usize;
    // Block at file offset WIDTH lives at the head of stripe 1
    assert_eq!(
        &stripe[start..start + WIDTH as usize],
        &data[WIDTH as usize..2 * WIDTH as usize]
    );
}

// =============================================================================
// Sparse Writes
// =============================================================================

#[tokio::test]
async fn test_sparse_writes_emit_parity_and_zero_padding() {
    let fx = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let piece_a = vec![0xaau8; 64];
    let piece_b = vec![0xbbu8; 64];

    let mut layout = fx.open_rw().await;
    layout.write(3 * WIDTH, &piece_a).await.unwrap();
    layout.write(7 * WIDTH, &piece_b).await.unwrap();
    layout.close().await.unwrap();

    let mut layout = fx.open_ro().await.unwrap();
    assert_eq!(layout.file_size(), 7 * WIDTH + 64);

    let mut out = vec![0u8; 64];
    layout.read(3 * WIDTH, &mut out).await.unwrap();
    assert_eq!(out, piece_a);
    layout.read(7 * WIDTH, &mut out).await.unwrap();
    assert_eq!(out, piece_b);

    // The hole between the pieces reads back as zeros
    let mut hole = vec![0xffu8; WIDTH as usize];
    layout.read(4 * WIDTH, &mut hole).await.unwrap();
    assert_eq!(hole, vec![0u8; WIDTH as usize]);
    layout.close().await.unwrap();

    // Parity protects the sparse pieces: erase the stripe holding the
    // piece at 3 * WIDTH and read it back through reconstruction
    fx.factory
        .fail_read_range("stripe1/f", HEADER_SIZE, u64::MAX - HEADER_SIZE);
    let mut layout = fx.open_ro().await.unwrap();
    let mut out = vec![0u8; 64];
    layout.read(3 * WIDTH, &mut out).await.unwrap();
    assert_eq!(out, piece_a);
    layout.close().await.unwrap();
}

#[tokio::test]
async fn test_streaming_and_sparse_orders_produce_identical_stripes() {
    let chunk = WIDTH as usize;
    let nb_chunks = 8;
    let data = pattern(nb_chunks * chunk);

    // Streaming order
    let fx_a = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let mut layout = fx_a.open_rw().await;
    for i in 0..nb_chunks {
        layout
            .write((i * chunk) as u64, &data[i * chunk..(i + 1) * chunk])
            .await
            .unwrap();
    }
    layout.close().await.unwrap();

    // Same chunks, scrambled order
    let fx_b = Fixture::new(Scheme::ReedSolomon, 2, 1);
    let mut layout = fx_b.open_rw().await;
    for &i in &[5usize, 0, 7, 2, 6, 1, 3, 4] {
        layout
            .write((i * chunk) as u64, &data[i * chunk..(i + 1) * chunk])
            .await
            .unwrap();
    }
    layout.close().await.unwrap();

    // Post-close stripe files are byte-identical, parity included
    for stripe in 0..3 {
        let a = std::fs::read(&fx_a.stripe_paths[stripe]).unwrap();
        let b = std::fs::read(&fx_b.stripe_paths[stripe]).unwrap();
        assert_eq!(a, b, "stripe {stripe} differs");
    }

    // And both files read back the same content
    let mut layout = fx_b.open_ro().await.unwrap();
    let mut out = vec![0u8; data.len()];
    layout.read(0, &mut out).await.unwrap();
    assert_eq!(out, data);
    layout.close().await.unwrap();
}
