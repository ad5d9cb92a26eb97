//! Benchmarks for artifact pattern matching and resolution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipeguard::report::{resolve_artifacts, ArtifactPattern};
use std::fs;
use tempfile::TempDir;

fn populated_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    for module in 0..20 {
        let reports = dir.path().join(format!("services/svc{module}/reports"));
        fs::create_dir_all(&reports).unwrap();
        for n in 0..10 {
            fs::write(reports.join(format!("junit-{n}.xml")), "<testsuite/>").unwrap();
            fs::write(reports.join(format!("coverage-{n}.json")), "{}").unwrap();
        }
    }
    dir
}

fn glob_benchmark(c: &mut Criterion) {
    let pattern = ArtifactPattern::new("services/**/reports/*.xml").unwrap();
    c.bench_function("pattern_match", |b| {
        b.iter(|| black_box(pattern.matches(black_box("services/svc7/reports/junit-3.xml"))))
    });

    let workspace = populated_workspace();
    let patterns = vec![
        ArtifactPattern::new("services/**/reports/*.xml").unwrap(),
        ArtifactPattern::new("services/svc1*/reports/coverage-?.json").unwrap(),
    ];
    c.bench_function("resolve_400_files", |b| {
        b.iter(|| black_box(resolve_artifacts(workspace.path(), &patterns)))
    });
}

criterion_group!(benches, glob_benchmark);
criterion_main!(benches);
