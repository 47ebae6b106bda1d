//! # Generic Dispatch Tests
//!
//! A series descriptor that only exposes its invoker traits still reaches
//! typed serializer construction and header restore.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use binseries::model::{GenericInvoker, GenericInvoker2, SeriesDescriptor};
use binseries::{
    record, CodecConfig, CodecRegistry, DynamicSerializer, ErasedSerializer, HeaderLoader, Scalar,
    SerializerFactory, SliceCursor,
};

record! {
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct Bar { pub ts: i64, pub close: f32, pub volume: u32 }
}

static_assertions::assert_impl_all!(SerializerFactory: Send, Sync, Clone);
static_assertions::assert_impl_all!(HeaderLoader: Send, Sync, Clone);

fn descriptor() -> SeriesDescriptor<i64, Bar> {
    SeriesDescriptor::new("bars", |b: &Bar| b.ts)
}

fn build<S: GenericInvoker>(series: &S) -> Box<dyn ErasedSerializer> {
    series.run_generic_method(&SerializerFactory::default(), ()).unwrap()
}

fn restore<S: GenericInvoker2>(series: &S, header: Bytes) -> Box<dyn ErasedSerializer> {
    let loader = HeaderLoader::new(CodecConfig::default(), Arc::new(CodecRegistry::new()));
    series.run_generic_method2(&loader, header).unwrap()
}

#[test]
fn test_factory_builds_typed_serializer() {
    let t = Instant::now();

    let series = descriptor();
    let erased = build(&series);
    assert_eq!(erased.record_type(), <Bar as binseries::Schema>::value_type());
    assert!(erased.downcast_ref::<Bar>().is_some());
    assert!(erased.downcast_ref::<u8>().is_none());
    assert_eq!(erased.max_record_size(), 3 * 10);

    let overhead = t.elapsed();
    println!("test_factory_builds_typed_serializer: Testing Overhead = {:?}", overhead);
}

#[test]
fn test_loader_restores_from_header() {
    let t = Instant::now();

    let series = descriptor();
    let erased = build(&series);
    let mut header = BytesMut::new();
    erased.write_header(&mut header).unwrap();

    let restored = restore(&series, header.freeze());
    assert_eq!(restored.tree().unwrap(), erased.tree().unwrap());

    let data: Vec<Bar> = (0..10)
        .map(|i| Bar { ts: 60 * i, close: 100.0 + i as f32, volume: 5 * i as u32 })
        .collect();
    let typed: &DynamicSerializer<Bar> = erased.downcast_ref::<Bar>().unwrap();
    let blocks = typed.pack_all(&mut SliceCursor::new(&data).unwrap()).unwrap();
    assert_eq!(blocks.len(), 1);

    let rows = restored.unpack_rows(blocks[0].clone(), usize::MAX).unwrap();
    assert_eq!(rows.len(), data.len());
    assert_eq!(rows[3], vec![Scalar::I64(180), Scalar::F32(103.0), Scalar::U32(15)]);
    assert_eq!(series.index_of(&data[3]), 180);

    let overhead = t.elapsed();
    println!("test_loader_restores_from_header: Testing Overhead = {:?}", overhead);
}
