use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use cnpj_consolidator::chunk::ChunkWriter;
use cnpj_consolidator::dedup::deduplicate;
use cnpj_consolidator::merge::MergeEngine;
use cnpj_consolidator::period::Period;
use cnpj_consolidator::policy::ESTABLISHMENT;
use cnpj_consolidator::record::Record;
use cnpj_consolidator::store::Store;

fn generate_establishments(rows: usize) -> Vec<Record> {
    (0..rows)
        .map(|i| {
            let basico = format!("{:08}", i / 3);
            let ordem = format!("{:04}", i % 3 + 1);
            let uf = ["SP", "RJ", "MG", "RS"][i % 4];
            let trade_name = format!("LOJA {i}");
            Record::from_fields(
                &ESTABLISHMENT,
                &[
                    ("cnpj_basico", basico.as_str()),
                    ("cnpj_ordem", ordem.as_str()),
                    ("cnpj_dv", "00"),
                    ("nome_fantasia", trade_name.as_str()),
                    ("uf", uf),
                ],
            )
            .expect("record")
        })
        .collect()
}

fn fresh_store() -> Store {
    let store = Store::open_in_memory().expect("store");
    store.create_tables().expect("tables");
    store
}

fn bench_merge(c: &mut Criterion) {
    let records = generate_establishments(20_000);
    let engine = MergeEngine::new(&ESTABLISHMENT);
    let writer = ChunkWriter::two_tier();
    let first = Period::new(2023, 1).expect("period");
    let second = Period::new(2023, 2).expect("period");
    let no_checkpoint = |_: &rusqlite::Connection| -> rusqlite::Result<()> { Ok(()) };

    let mut group = c.benchmark_group("merge_20k_establishments");
    group.sample_size(10);
    group.bench_function("insert_fresh", |b| {
        b.iter_batched(
            fresh_store,
            |mut store| {
                writer
                    .write(&mut store, &engine, &records, first, &no_checkpoint)
                    .expect("write");
            },
            BatchSize::PerIteration,
        );
    });
    group.bench_function("update_next_period", |b| {
        b.iter_batched(
            || {
                let mut store = fresh_store();
                writer
                    .write(&mut store, &engine, &records, first, &no_checkpoint)
                    .expect("seed");
                store
            },
            |mut store| {
                writer
                    .write(&mut store, &engine, &records, second, &no_checkpoint)
                    .expect("write");
            },
            BatchSize::PerIteration,
        );
    });
    group.bench_function("deduplicate", |b| {
        b.iter_batched(
            || records.clone(),
            deduplicate,
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
