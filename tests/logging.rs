//! Confirms the crate actually emits the `log::trace!` points that
//! `map_codec` raises at chunk-finalization and heterogeneity-escalation
//! decisions, capturing them with `simplelog`'s `WriteLogger` pointed at
//! an in-memory sink instead of a terminal so the test can assert on the
//! captured lines.

mod support;

use std::any::Any;
use std::io::Write;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use simplelog::{Config, LevelFilter, WriteLogger};

use fury_core::generics::GenericsStack;
use fury_core::map_codec::{write_map, MapWriteCall};
use fury_core::ref_resolver::RefResolver;
use fury_core::Buffer;

use support::resolver;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn chunk_finalization_is_traced() {
    let sink = SharedBuf::default();
    WriteLogger::init(LevelFilter::Trace, Config::default(), sink.clone())
        .expect("this test process installs the global logger exactly once");

    let class_resolver = resolver(false);
    // Two homogeneous entries followed by a type change force a chunk to
    // finalize mid-map, which is the `trace!` call site in
    // `map_codec::finalize_chunk` this test exercises.
    let entries: Vec<(Option<Rc<dyn Any>>, Option<Rc<dyn Any>>)> = vec![
        (
            Some(Rc::new("a".to_string()) as Rc<dyn Any>),
            Some(Rc::new(1i32) as Rc<dyn Any>),
        ),
        (
            Some(Rc::new(7i32) as Rc<dyn Any>),
            Some(Rc::new("x".to_string()) as Rc<dyn Any>),
        ),
    ];
    let write_call = MapWriteCall::default();

    let mut buf = Buffer::new();
    let mut ref_resolver = RefResolver::new();
    let mut generics = GenericsStack::new();
    write_map(&mut buf, &entries, write_call, &class_resolver, &mut ref_resolver, &mut generics)
        .unwrap();

    let logged = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
    assert!(
        logged.contains("finalizing chunk") || logged.contains("heterogeneity escalated"),
        "expected a chunk-boundary trace line, got: {logged:?}"
    );
}
