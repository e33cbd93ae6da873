use blob_stream::{
    BlobColumn, DownloadRequest, MemorySession, RowKey, StreamEngine, TransferSettings, TransferTarget,
    UploadRequest,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

const PAYLOAD: usize = 4 * 1024 * 1024;

fn target() -> TransferTarget {
    let column = BlobColumn::new(Some("dbo".to_string()), "Files", "Id", "FileData").unwrap();
    TransferTarget::new(column, 1)
}

fn transfer_benchmark(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let payload: Vec<u8> = (0..PAYLOAD).map(|i| i as u8).collect();

    let mut group = c.benchmark_group("transfer");
    group.throughput(Throughput::Bytes(PAYLOAD as u64));

    for chunk in [8 * 1024, 81_920, 1024 * 1024] {
        for pooled in [true, false] {
            let settings = TransferSettings::default()
                .with_upload_chunk_size(chunk)
                .with_download_chunk_size(chunk)
                .with_pooled_buffers(pooled);
            let engine = StreamEngine::new(settings).unwrap();
            let label = if pooled { "pooled" } else { "fresh" };

            group.bench_with_input(BenchmarkId::new(format!("upload/{label}"), chunk), &chunk, |b, _| {
                b.iter(|| {
                    let session = MemorySession::default();
                    session.insert_row(&target().column, 1, Some(Vec::new()));
                    let request = UploadRequest::for_target(target()).source(payload.as_slice());
                    runtime.block_on(engine.upload(&session, request)).unwrap()
                })
            });

            let session = MemorySession::default();
            session.insert_row(&target().column, RowKey::Int(1), Some(payload.clone()));
            group.bench_with_input(BenchmarkId::new(format!("download/{label}"), chunk), &chunk, |b, _| {
                b.iter(|| {
                    let mut out = Vec::with_capacity(PAYLOAD);
                    let request = DownloadRequest::for_target(target()).destination(&mut out);
                    runtime.block_on(engine.download(&session, request)).unwrap()
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, transfer_benchmark);
criterion_main!(benches);
