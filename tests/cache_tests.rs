//! # Compiled-Procedure Cache Tests
//!
//! Serializers with structurally equal trees share one compiled block, no
//! matter how many threads freeze them at once.

use std::any::Any;
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use binseries::codec::{CompileContext, DecodeCtx, DecodeStep, EncodeCtx, EncodeStep, FieldBase};
use binseries::model::Primitive;
use binseries::{
    record, BlockCache, CodecError, ComplexField, DynamicSerializer, Field, FieldTree, Result,
    ScaledDeltaIntField, ValueType,
};

record! {
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct Sample { pub ts: i64, pub level: u16, pub on: bool }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn serializer(divider: u64) -> DynamicSerializer<Sample> {
    let mut s = DynamicSerializer::<Sample>::new().unwrap();
    s.root_as_mut::<ComplexField>()
        .unwrap()
        .field_as_mut::<ScaledDeltaIntField>("ts")
        .unwrap()
        .set_divider(divider)
        .unwrap();
    s
}

#[test]
fn test_concurrent_freezes_compile_once() {
    init_tracing();
    let t = Instant::now();

    const THREADS: usize = 8;
    let cache = Arc::new(BlockCache::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut s = serializer(1_000);
                barrier.wait();
                s.freeze_with(&cache).unwrap();
                Arc::clone(s.compiled().unwrap())
            })
        })
        .collect();

    let blocks: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for block in &blocks[1..] {
        assert!(Arc::ptr_eq(&blocks[0], block));
    }
    assert_eq!(cache.compilations(), 1);
    assert_eq!(cache.len(), 1);

    let overhead = t.elapsed();
    println!("test_concurrent_freezes_compile_once: Testing Overhead = {:?}", overhead);
}

#[test]
fn test_different_configuration_compiles_separately() {
    init_tracing();
    let t = Instant::now();

    let cache = BlockCache::new();
    let mut a = serializer(10);
    let mut b = serializer(100);
    let mut c = serializer(10);
    a.freeze_with(&cache).unwrap();
    b.freeze_with(&cache).unwrap();
    c.freeze_with(&cache).unwrap();

    assert!(!Arc::ptr_eq(a.compiled().unwrap(), b.compiled().unwrap()));
    assert!(Arc::ptr_eq(a.compiled().unwrap(), c.compiled().unwrap()));
    assert_eq!(cache.compilations(), 2);
    assert_eq!(cache.len(), 2);

    let overhead = t.elapsed();
    println!("test_different_configuration_compiles_separately: Testing Overhead = {:?}", overhead);
}

#[test]
fn test_global_cache_is_shared() {
    init_tracing();
    let t = Instant::now();

    // Divider unique to this test so other tests cannot race the count.
    let mut a = serializer(7_919);
    let mut b = serializer(7_919);
    a.freeze().unwrap();
    let before = BlockCache::global().compilations();
    b.freeze().unwrap();

    assert!(Arc::ptr_eq(a.compiled().unwrap(), b.compiled().unwrap()));
    assert_eq!(BlockCache::global().compilations(), before);
    assert!(!BlockCache::global().is_empty());

    let overhead = t.elapsed();
    println!("test_global_cache_is_shared: Testing Overhead = {:?}", overhead);
}

/// Raw `i64` leaf whose first encoder build fails.
#[derive(Debug)]
struct FlakyField {
    base: FieldBase,
    fail_next: AtomicBool,
}

impl FlakyField {
    fn new() -> Self {
        Self {
            base: FieldBase::new(ValueType::Primitive(Primitive::I64), "root"),
            fail_next: AtomicBool::new(true),
        }
    }
}

impl Field for FlakyField {
    fn kind(&self) -> &str {
        "FlakyField"
    }

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn max_byte_size(&self) -> usize {
        8
    }

    fn build_encoder(&self, _ctx: &mut CompileContext, pos: usize) -> Result<EncodeStep> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CodecError::NotInitialized("flaky encoder"));
        }
        Ok(EncodeStep {
            init: Box::new(move |ctx: &mut EncodeCtx<'_>| {
                let v: i64 = ctx.value(pos)?;
                ctx.writer.write_raw(&v.to_le_bytes())
            }),
            delta: Box::new(move |ctx: &mut EncodeCtx<'_>| {
                let v: i64 = ctx.value(pos)?;
                Ok(ctx.writer.try_write_raw(&v.to_le_bytes()))
            }),
        })
    }

    fn build_decoder(&self, _ctx: &mut CompileContext, pos: usize) -> Result<DecodeStep> {
        Ok(DecodeStep {
            init: Box::new(move |ctx: &mut DecodeCtx<'_>| {
                let v = i64::from_le_bytes(ctx.reader.read_raw()?);
                ctx.set_value(pos, v)
            }),
            delta: Box::new(move |ctx: &mut DecodeCtx<'_>| {
                let v = i64::from_le_bytes(ctx.reader.read_raw()?);
                ctx.set_value(pos, v)
            }),
        })
    }

    fn config_eq(&self, _other: &dyn Field) -> bool {
        true
    }

    fn config_hash(&self, _state: &mut dyn Hasher) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn test_failed_compilation_is_retried() {
    init_tracing();
    let t = Instant::now();

    let cache = BlockCache::new();
    let tree = Arc::new(FieldTree::new(Box::new(FlakyField::new())).unwrap());

    let err = cache.get_or_compile(Arc::clone(&tree)).unwrap_err();
    assert!(matches!(err, CodecError::NotInitialized("flaky encoder")));
    assert_eq!(cache.compilations(), 1);

    let first = cache.get_or_compile(Arc::clone(&tree)).unwrap();
    assert_eq!(cache.compilations(), 2);

    let again = cache.get_or_compile(tree).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(cache.compilations(), 2);
    assert_eq!(cache.len(), 1);

    let overhead = t.elapsed();
    println!("test_failed_compilation_is_retried: Testing Overhead = {:?}", overhead);
}
