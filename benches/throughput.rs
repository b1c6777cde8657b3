use criterion::{criterion_group, criterion_main, Criterion};
use fnrunner::agent::{Agent, Call, CallContext, CallOptions};
use fnrunner::dispatcher::{capture_payload, clean_path, CallTarget, Dispatcher};
use fnrunner::models::{ApiError, CallModel, ExecutionMode};
use fnrunner::server::{InboundRequest, RequestHead, ResponseWriter};
use std::hint::black_box;
use std::sync::Arc;

/// Accepts everything and drops it, so only dispatch overhead is measured.
struct NullAgent(ExecutionMode);

impl Agent for NullAgent {
    fn get_call<'a>(&self, opts: CallOptions<'a>) -> Result<Call<'a>, ApiError> {
        let (writer, source, ctx) = opts.into_parts();
        let (app, path, req) = source.ok_or(ApiError::MissingAppName)?;
        let (_head, body) = req.into_parts();
        let model = CallModel::new(app, path, self.0)?;
        Ok(Call::new(model, Some(body), writer.unwrap_or_default(), ctx))
    }

    fn enqueue(&self, _ctx: &CallContext, model: CallModel) -> Result<(), ApiError> {
        black_box(model);
        Ok(())
    }

    fn submit(&self, call: Call<'_>) -> Result<(), ApiError> {
        call.writer().write(b"{}");
        Ok(())
    }
}

fn bench_dispatch(c: &mut Criterion) {
    let payload = vec![b'a'; 4096];

    for (name, mode) in [
        ("dispatch_async_4k", ExecutionMode::Async),
        ("dispatch_sync", ExecutionMode::Sync),
    ] {
        let dispatcher = Dispatcher::new(Arc::new(NullAgent(mode)));
        c.bench_function(name, |b| {
            b.iter(|| {
                let writer = ResponseWriter::new();
                let head = RequestHead::new("POST", "/r/bench/fn")
                    .with_header("Content-Length", "4096");
                dispatcher.handle_function_call(
                    CallTarget::new(Some("bench"), Some("/fn")),
                    InboundRequest::new(head, &payload[..]),
                    &writer,
                    &CallContext::new(),
                );
                black_box(writer.status());
            })
        });
    }
}

fn bench_helpers(c: &mut Criterion) {
    c.bench_function("clean_path", |b| {
        b.iter(|| black_box(clean_path(black_box("//a/./b/../c//d/"))))
    });

    let small = vec![b'z'; 64];
    c.bench_function("capture_payload_unknown_length", |b| {
        b.iter(|| {
            let mut body = &small[..];
            black_box(capture_payload(&mut body, -1, 0).ok())
        })
    });
}

criterion_group!(benches, bench_dispatch, bench_helpers);
criterion_main!(benches);
