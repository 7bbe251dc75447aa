use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use frameflow_graphics::backend::{Device, DummyDevice};
use frameflow_graphics::binding::{BindParameterDesc, BindingLayout};
use frameflow_graphics::graph::{FnNode, FnTask, NodeGraph, TaskFragment};
use frameflow_graphics::{FrameContext, Pipeline, Scheduler, SchedulerConfig};

fn noop_node(name: String) -> Arc<FnNode> {
    Arc::new(FnNode::new(name.clone(), move || {
        TaskFragment::single(FnTask::new(name.clone(), |_| Ok(())))
    }))
}

/// Chain of `len` nodes where every node also depends on the one two back.
fn chain_graph(len: usize) -> NodeGraph {
    let mut graph = NodeGraph::new();
    let handles: Vec<_> = (0..len)
        .map(|i| graph.add_node(noop_node(format!("node_{i}"))))
        .collect();
    for i in 1..len {
        graph.add_dependency(handles[i], handles[i - 1]).unwrap();
        if i >= 2 {
            graph.add_dependency(handles[i], handles[i - 2]).unwrap();
        }
    }
    graph
}

// ---------------------------------------------------------------------------
// Binding layout compilation
// ---------------------------------------------------------------------------

fn bench_layout_compile_small(c: &mut Criterion) {
    let params = [
        BindParameterDesc::constants(0, 4),
        BindParameterDesc::constants(1, 80),
        BindParameterDesc::constants(2, 0),
    ];
    c.bench_function("layout_compile_3_constants", |b| {
        b.iter(|| BindingLayout::compile(black_box(&params)).unwrap());
    });
}

fn bench_layout_compile_large(c: &mut Criterion) {
    let mut params = Vec::new();
    for register in 0..8 {
        params.push(BindParameterDesc::constants(register, 64).with_frequency(register));
    }
    for register in 0..32 {
        params.push(BindParameterDesc::texture(register));
    }
    for register in 0..8 {
        params.push(BindParameterDesc::unordered(register));
        params.push(BindParameterDesc::sampler(register));
    }
    c.bench_function("layout_compile_56_parameters", |b| {
        b.iter(|| BindingLayout::compile(black_box(&params)).unwrap());
    });
}

// ---------------------------------------------------------------------------
// Pipeline construction
// ---------------------------------------------------------------------------

fn bench_pipeline_build(c: &mut Criterion) {
    let graph = chain_graph(64);
    c.bench_function("pipeline_build_64_nodes", |b| {
        b.iter(|| {
            let mut pipeline = Pipeline::new();
            pipeline.create_from_nodes_list(black_box(&graph)).unwrap();
            black_box(pipeline.edges().len());
        });
    });
}

// ---------------------------------------------------------------------------
// Frame execution
// ---------------------------------------------------------------------------

fn bench_execute_frame(c: &mut Criterion) {
    let device: Arc<dyn Device> = Arc::new(DummyDevice::new());
    let mut scheduler = Scheduler::new(device, SchedulerConfig::default()).unwrap();
    scheduler.set_pipeline(&chain_graph(16)).unwrap();
    let mut index = 0;
    c.bench_function("execute_frame_16_nodes", |b| {
        b.iter(|| {
            let point = scheduler
                .execute(&FrameContext::new(index, Duration::ZERO))
                .unwrap();
            index += 1;
            black_box(point.value());
        });
    });
    scheduler.wait_idle().unwrap();
}

criterion_group!(
    benches,
    bench_layout_compile_small,
    bench_layout_compile_large,
    bench_pipeline_build,
    bench_execute_frame,
);
criterion_main!(benches);
