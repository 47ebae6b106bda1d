//! # Block Round-Trip Tests
//!
//! Packs record runs into blocks and reads them back: the 1000-record
//! scenario, block capacity boundaries, delta arithmetic and overflow.

use std::time::Instant;

use binseries::{
    record, CodecReader, CodecWriter, ComplexField, DynamicSerializer, ScaledDeltaFloatField,
    ScaledDeltaIntField, SerializerError, SliceCursor,
};

record! {
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct Tick { pub id: u16, pub ts: i64, pub value: f64 }
}

record! {
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct Counter { pub n: i32 }
}

record! {
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct Wide { pub v: i64 }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn tick_serializer() -> DynamicSerializer<Tick> {
    let mut s = DynamicSerializer::<Tick>::new().unwrap();
    s.root_as_mut::<ComplexField>()
        .unwrap()
        .field_as_mut::<ScaledDeltaFloatField>("value")
        .unwrap()
        .set_multiplier(10_000.0)
        .unwrap();
    s.freeze().unwrap();
    s
}

fn ticks(n: usize) -> Vec<Tick> {
    (0..n)
        .map(|i| Tick {
            id: i as u16,
            ts: 1_600_000_000 + 60 * i as i64,
            value: (1_000_000 + 37 * i as i64) as f64 / 10_000.0,
        })
        .collect()
}

/// 1000 records in 100-record runs give exactly 10 blocks and come back intact.
#[test]
fn test_thousand_ticks_in_ten_blocks() {
    init_tracing();
    let t = Instant::now();

    let s = tick_serializer();
    let data = ticks(1000);
    let pack = s.pack_procedure().unwrap();

    let mut blocks = Vec::new();
    for run in data.chunks(100) {
        let mut writer = CodecWriter::new(4096).unwrap();
        let mut cursor = SliceCursor::new(run).unwrap();
        let more = pack.run(&mut writer, &mut cursor).unwrap();
        assert!(!more, "a 100-record run must fit one 4 KiB block");
        blocks.push(writer.into_block());
    }
    assert_eq!(blocks.len(), 10);

    let unpack = s.unpack_procedure().unwrap();
    let mut back = Vec::new();
    for block in &blocks {
        let mut reader = CodecReader::new(block.clone());
        let header = reader.clone().read_header().unwrap();
        assert_eq!(header.item_count, 100);
        assert!(!header.has_more);
        assert_eq!(unpack.run(&mut reader, &mut back, 1000).unwrap(), 100);
    }
    assert_eq!(back, data);

    let overhead = t.elapsed();
    println!("test_thousand_ticks_in_ten_blocks: Testing Overhead = {:?}", overhead);
}

/// A block of capacity for exactly K records holds K; the K+1-th starts a new block.
#[test]
fn test_block_capacity_boundary() {
    let t = Instant::now();

    const K: usize = 10;
    let mut s = DynamicSerializer::<Counter>::new().unwrap();
    s.freeze().unwrap();
    // Every value (first and deltas) encodes as a single varint byte.
    let data: Vec<Counter> = (0..=K as i32).map(|n| Counter { n }).collect();

    let mut writer = CodecWriter::new(binseries::buffer::BLOCK_HEADER_SIZE + K).unwrap();
    let mut cursor = SliceCursor::new(&data).unwrap();
    assert!(s.pack_block(&mut writer, &mut cursor).unwrap());
    assert_eq!(writer.payload_len(), K, "the rejected record must not leave bytes behind");
    assert_eq!(cursor.position(), K);

    let first = writer.take_block();
    assert!(!s.pack_block(&mut writer, &mut cursor).unwrap());
    let second = writer.take_block();

    let mut back = Vec::new();
    assert_eq!(s.unpack_block(&mut CodecReader::new(first), &mut back, usize::MAX).unwrap(), K);
    assert_eq!(s.unpack_block(&mut CodecReader::new(second), &mut back, usize::MAX).unwrap(), 1);
    assert_eq!(back, data);

    let mut roomy = CodecWriter::new(binseries::buffer::BLOCK_HEADER_SIZE + K + 1).unwrap();
    let mut cursor = SliceCursor::new(&data).unwrap();
    assert!(!s.pack_block(&mut roomy, &mut cursor).unwrap());
    assert_eq!(roomy.payload_len(), K + 1);

    let overhead = t.elapsed();
    println!("test_block_capacity_boundary: Testing Overhead = {:?}", overhead);
}

/// Stored deltas are the scaled differences, and scale multiples decode exactly.
#[test]
fn test_integer_delta_with_scale() {
    let t = Instant::now();

    let mut s = DynamicSerializer::<Wide>::new().unwrap();
    s.root_as_mut::<ComplexField>()
        .unwrap()
        .field_as_mut::<ScaledDeltaIntField>("v")
        .unwrap()
        .set_divider(100)
        .unwrap();
    s.freeze().unwrap();

    let data = [Wide { v: 1000 }, Wide { v: 1200 }];
    let mut writer = CodecWriter::new(64).unwrap();
    s.pack_block(&mut writer, &mut SliceCursor::new(&data).unwrap()).unwrap();
    // zigzag(10) = 20, zigzag(12 - 10) = 4
    assert_eq!(&writer.block()[4..], &[20, 4]);

    let mut back = Vec::new();
    s.unpack_block(&mut CodecReader::new(writer.into_block()), &mut back, 2).unwrap();
    assert_eq!(back, data);

    // Off-grid values are refused, in the first record and in a delta.
    for rough in [
        [Wide { v: 1049 }, Wide { v: 1200 }],
        [Wide { v: 1000 }, Wide { v: 1234 }],
    ] {
        let mut writer = CodecWriter::new(64).unwrap();
        let err = s
            .pack_block(&mut writer, &mut SliceCursor::new(&rough).unwrap())
            .unwrap_err();
        assert!(matches!(
            err.as_serializer(),
            Some(SerializerError::ValueOutOfRange { state_name, .. }) if state_name == "root.v"
        ));
    }

    let overhead = t.elapsed();
    println!("test_integer_delta_with_scale: Testing Overhead = {:?}", overhead);
}

/// Floating values decode within half a scale step.
#[test]
fn test_float_delta_within_half_scale() {
    let t = Instant::now();

    let mut s = DynamicSerializer::<f64>::new().unwrap();
    s.root_as_mut::<ScaledDeltaFloatField>().unwrap().set_multiplier(10.0).unwrap();
    s.freeze().unwrap();

    let data = [1.0, 1.26, 0.94, -3.333];
    let blocks = s.pack_all(&mut SliceCursor::new(&data).unwrap()).unwrap();
    let back = s.unpack_all(&blocks).unwrap();
    for (orig, got) in data.iter().zip(&back) {
        assert!((orig - got).abs() <= 0.05 + 1e-12, "{orig} decoded as {got}");
    }

    let overhead = t.elapsed();
    println!("test_float_delta_within_half_scale: Testing Overhead = {:?}", overhead);
}

/// A delta that overflows i64 is not an error; it closes the block.
#[test]
fn test_delta_overflow_starts_new_block() {
    let t = Instant::now();

    let mut s = DynamicSerializer::<Wide>::new().unwrap();
    s.freeze().unwrap();
    let data = [Wide { v: i64::MIN }, Wide { v: i64::MAX }, Wide { v: i64::MAX - 1 }];

    let blocks = s.pack_all(&mut SliceCursor::new(&data).unwrap()).unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(s.unpack_all(&blocks).unwrap(), data);

    let overhead = t.elapsed();
    println!("test_delta_overflow_starts_new_block: Testing Overhead = {:?}", overhead);
}

/// `max_item_count` bounds decoding; zero decodes nothing.
#[test]
fn test_unpack_respects_max_item_count() {
    let t = Instant::now();

    let s = tick_serializer();
    let data = ticks(20);
    let blocks = s.pack_all(&mut SliceCursor::new(&data).unwrap()).unwrap();
    assert_eq!(blocks.len(), 1);

    let mut out = Vec::new();
    assert_eq!(s.unpack_block(&mut CodecReader::new(blocks[0].clone()), &mut out, 0).unwrap(), 0);
    assert!(out.is_empty());

    assert_eq!(s.unpack_block(&mut CodecReader::new(blocks[0].clone()), &mut out, 7).unwrap(), 7);
    assert_eq!(out, data[..7]);

    let overhead = t.elapsed();
    println!("test_unpack_respects_max_item_count: Testing Overhead = {:?}", overhead);
}

/// A block too small for even the first record is an error, not an empty block.
#[test]
fn test_block_too_small_for_first_record() {
    let t = Instant::now();

    let s = tick_serializer();
    let data = ticks(1);
    let mut writer = CodecWriter::new(6).unwrap();
    let err = s
        .pack_block(&mut writer, &mut SliceCursor::new(&data).unwrap())
        .unwrap_err();
    assert!(matches!(
        err.as_serializer(),
        Some(binseries::SerializerError::BufferOverflow { .. })
    ));

    let overhead = t.elapsed();
    println!("test_block_too_small_for_first_record: Testing Overhead = {:?}", overhead);
}

/// Block size from TOML configuration drives `pack_all`.
#[test]
fn test_configured_block_size() {
    let t = Instant::now();

    let config = binseries::CodecConfig::from_toml_str("block_size = 64").unwrap();
    let mut s = DynamicSerializer::<Tick>::with_options(
        config,
        std::sync::Arc::new(binseries::CodecRegistry::new()),
        None,
    )
    .unwrap();
    s.freeze().unwrap();

    let data = ticks(300);
    let blocks = s.pack_all(&mut SliceCursor::new(&data).unwrap()).unwrap();
    assert!(blocks.len() > 1);
    assert!(blocks.iter().all(|b| b.len() <= 64));
    assert_eq!(s.unpack_all(&blocks).unwrap(), data);

    let overhead = t.elapsed();
    println!("test_configured_block_size: Testing Overhead = {:?}", overhead);
}
