use criterion::{criterion_group, criterion_main, Criterion};
use disclosure_ledger_core::{
    check_within_year, diff_reports, flatten_report, normalize, within_year_formulas, DiffOptions,
    FactSnapshot,
};
use serde_json::{json, Value};

fn mk_report(year: usize) -> Value {
    let paragraph = (0..40)
        .map(|index| format!("本年度共主动公开政府信息{}条，其中规章{}件。", 1000 + year * index, index))
        .collect::<String>();
    json!({
        "sections": [
            { "title": "一、总体情况", "type": "text", "content": paragraph },
            { "title": "二、主动公开政府信息情况", "type": "table_2",
              "activeDisclosureData": { "regulations": { "made": 12, "repealed": 2, "valid": 110 } } },
            { "title": "三、收到和处理政府信息公开申请情况", "type": "table_3",
              "tableData": { "total": { "newReceived": "1,200", "carriedOver": 30,
                                        "results": { "granted": 900, "totalProcessed": 1200, "carriedForward": 30 } } } },
            { "title": "五、存在的主要问题及改进情况", "type": "text", "content": "信息公开工作仍有不足。" }
        ]
    })
}

fn bench_normalize(c: &mut Criterion) {
    let raw = mk_report(1);

    c.bench_function("normalize_and_flatten_report", |b| {
        b.iter(|| {
            let canonical = normalize(&raw);
            if let Err(err) = flatten_report(canonical.as_value()) {
                panic!("normalize benchmark flatten failed: {err}");
            }
        });
    });
}

fn bench_check(c: &mut Criterion) {
    let canonical = normalize(&mk_report(1));
    let snapshot = match flatten_report(canonical.as_value()) {
        Ok(flattened) => FactSnapshot::from(&flattened),
        Err(err) => panic!("check benchmark fixture failed: {err}"),
    };
    let formulas = within_year_formulas();

    c.bench_function("within_year_check_default_formulas", |b| {
        b.iter(|| {
            if let Err(err) = check_within_year(&snapshot, &formulas) {
                panic!("check benchmark failed: {err}");
            }
        });
    });
}

fn bench_diff(c: &mut Criterion) {
    let old = normalize(&mk_report(1)).into_value();
    let new = normalize(&mk_report(2)).into_value();
    let options = DiffOptions::default();

    c.bench_function("diff_reports_two_years", |b| {
        b.iter(|| diff_reports(&old, &new, &options));
    });
}

criterion_group!(pipeline_benches, bench_normalize, bench_check, bench_diff);
criterion_main!(pipeline_benches);
