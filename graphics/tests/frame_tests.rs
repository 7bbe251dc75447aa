//! Full frames on the dummy device.
//!
//! Each test builds a node graph, runs it through [`Scheduler::execute`]
//! and inspects what reached the device.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rstest::rstest;

use common::{TestContext, clear_node, task_node};
use frameflow_graphics::binding::{BindParameter, BindParameterDesc, BindingLayout};
use frameflow_graphics::command::Command;
use frameflow_graphics::graph::{FnNode, FnTask, NodeGraph, TaskFragment};
use frameflow_graphics::types::{AddressMode, FilterMode};
use frameflow_graphics::{
    CommandListKind, FrameContext, FrameError, ResourceState, SchedulerConfig, Subresource,
};

// ============================================================================
// Graph shape
// ============================================================================

#[test]
fn test_chain_records_one_list() {
    let mut ctx = TestContext::new();
    let target = ctx.texture(16, 16);

    let mut graph = NodeGraph::new();
    let a = graph.add_node(clear_node("a", &target, [1.0, 0.0, 0.0, 1.0]));
    let b = graph.add_node(clear_node("b", &target, [0.0, 1.0, 0.0, 1.0]));
    let c = graph.add_node(clear_node("c", &target, [0.0, 0.0, 1.0, 1.0]));
    graph.add_dependency(b, a).unwrap();
    graph.add_dependency(c, b).unwrap();

    ctx.run_graph(&graph, 0).unwrap();

    let lists = ctx.dummy.submitted_lists();
    assert_eq!(lists.len(), 1);
    let clears: Vec<[f32; 4]> = lists[0]
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::ClearRenderTarget { color, .. } => Some(*color),
            _ => None,
        })
        .collect();
    assert_eq!(
        clears,
        vec![[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]]
    );
}

#[test]
fn test_redundant_node_edges_are_reduced() {
    let mut ctx = TestContext::new();
    let mut graph = NodeGraph::new();
    let a = graph.add_node(task_node("a", |_| Ok(())));
    let b = graph.add_node(task_node("b", |_| Ok(())));
    let c = graph.add_node(task_node("c", |_| Ok(())));
    graph.add_dependency(b, a).unwrap();
    graph.add_dependency(c, b).unwrap();
    graph.add_dependency(c, a).unwrap();

    ctx.scheduler.set_pipeline(&graph).unwrap();
    let pipeline = ctx.scheduler.pipeline();
    assert_eq!(pipeline.task_count(), 3);
    assert_eq!(pipeline.edges().len(), 2);
    assert_eq!(pipeline.forwarding_edges().len(), 2);
}

#[test]
fn test_cyclic_graph_rejected() {
    let mut ctx = TestContext::new();
    let mut graph = NodeGraph::new();
    let a = graph.add_node(task_node("a", |_| Ok(())));
    let b = graph.add_node(task_node("b", |_| Ok(())));
    graph.add_dependency(b, a).unwrap();
    graph.add_dependency(a, b).unwrap();

    let err = ctx.scheduler.set_pipeline(&graph).unwrap_err();
    assert!(matches!(err, FrameError::Graph(_)));
}

#[test]
fn test_empty_node_passes_dependencies_through() {
    let mut ctx = TestContext::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let order = Arc::clone(&order);
        task_node(name, move |_| {
            order.lock().push(name);
            Ok(())
        })
    };

    let mut graph = NodeGraph::new();
    let first = graph.add_node(record("first"));
    let empty = graph.add_node(Arc::new(FnNode::empty("group")));
    let last = graph.add_node(record("last"));
    graph.add_dependency(empty, first).unwrap();
    graph.add_dependency(last, empty).unwrap();

    ctx.run_graph(&graph, 0).unwrap();
    assert_eq!(ctx.scheduler.pipeline().edges().len(), 1);
    assert_eq!(*order.lock(), vec!["first", "last"]);
}

// ============================================================================
// Submission and state tracking
// ============================================================================

#[test]
fn test_conflicting_siblings_are_ordered() {
    let mut ctx = TestContext::new();
    let target = ctx.texture(8, 8);
    let sampled = target.clone();

    let mut graph = NodeGraph::new();
    let write = graph.add_node(clear_node("write", &target, [0.0; 4]));
    let layout = Arc::new(BindingLayout::compile(&[BindParameterDesc::texture(0)]).unwrap());
    let read = graph.add_node(task_node("read", move |ctx| {
        let list = ctx.graphics_list()?;
        list.set_graphics_layout(Arc::clone(&layout))?;
        list.bind_texture(BindParameter::texture(0), &sampled, None)?;
        list.draw(3, 1, 0, 0)
    }));
    let sibling = graph.add_node(task_node("sibling", |_| Ok(())));
    // two successors keep write from forwarding its list to read
    graph.add_dependency(read, write).unwrap();
    graph.add_dependency(sibling, write).unwrap();

    ctx.run_graph(&graph, 0).unwrap();

    let batches = ctx.dummy.submitted_batches();
    assert_eq!(batches.len(), 2);
    let Command::Barrier(transitions) = &batches[1].lists[0].commands[0] else {
        panic!("read list must start with a barrier");
    };
    assert_eq!(transitions[0].before, ResourceState::RENDER_TARGET);
    assert!(transitions[0].after.contains(ResourceState::PIXEL_SHADER_RESOURCE));
}

#[test]
fn test_back_buffer_presented() {
    let mut ctx = TestContext::new();
    let back_buffer = ctx.texture(64, 64);

    let mut graph = NodeGraph::new();
    graph.add_node(task_node("draw", |ctx| {
        let target = ctx
            .frame()
            .back_buffer
            .clone()
            .expect("frame carries a back buffer");
        ctx.graphics_list()?.clear_render_target(&target, [0.0; 4])
    }));
    ctx.scheduler.set_pipeline(&graph).unwrap();

    for index in 0..4 {
        let frame = FrameContext::new(index, Duration::from_millis(16))
            .with_back_buffer(back_buffer.clone());
        ctx.run_frame(frame).unwrap();
        assert_eq!(back_buffer.state(0), ResourceState::PRESENT);
    }
    // 4 frames of draw + present
    assert_eq!(ctx.dummy.submitted_lists().len(), 8);
}

#[test]
fn test_staged_upload_precedes_next_frame() {
    let mut ctx = TestContext::new();
    let buffer = ctx.buffer(1024);
    let target = buffer.clone();

    let mut graph = NodeGraph::new();
    graph.add_node(Arc::new(FnNode::new("streamer", move || {
        let target = target.clone();
        TaskFragment::single(FnTask::new("streamer", |_| Ok(())).with_setup(move |ctx| {
            if ctx.frame().frame_index == 0 {
                ctx.upload_buffer(&target, 128, &[0xab; 256])?;
            }
            Ok(())
        }))
    })));

    ctx.run_graph(&graph, 0).unwrap();
    assert!(ctx.dummy.submitted_lists().is_empty());

    ctx.run_frame(FrameContext::new(1, Duration::from_millis(16))).unwrap();
    let lists = ctx.dummy.submitted_lists();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].kind, CommandListKind::Copy);
    assert!(lists[0].commands.iter().any(|command| matches!(
        command,
        Command::CopyBuffer { dst, dst_offset: 128, size: 256, .. } if *dst == buffer.allocation()
    )));
    assert_eq!(buffer.state(0), ResourceState::COPY_DEST);
}

#[test]
fn test_mixed_capabilities_split_lists() {
    let mut ctx = TestContext::new();
    let source = ctx.buffer(256);
    let destination = ctx.buffer(256);
    let target = ctx.texture(8, 8);

    let mut graph = NodeGraph::new();
    graph.add_node(task_node("mixed", move |ctx| {
        ctx.copy_list()?.copy_buffer(&destination, 0, &source, 0, 256)?;
        ctx.graphics_list()?.clear_render_target(&target, [0.0; 4])
    }));
    ctx.run_graph(&graph, 0).unwrap();

    let kinds: Vec<CommandListKind> = ctx
        .dummy
        .submitted_lists()
        .iter()
        .map(|list| list.kind)
        .collect();
    assert_eq!(kinds, vec![CommandListKind::Copy, CommandListKind::Graphics]);
}

// ============================================================================
// Binding
// ============================================================================

#[test]
fn test_layout_places_dynamic_constants_in_buffer_view() {
    let mut ctx = TestContext::new();
    let layout = ctx
        .scheduler
        .resources()
        .compile_layout(&[
            BindParameterDesc::constants(0, 4),
            BindParameterDesc::constants(1, 80),
            BindParameterDesc::constants(2, 0),
        ])
        .unwrap();

    let mut graph = NodeGraph::new();
    graph.add_node(task_node("constants", move |ctx| {
        let list = ctx.graphics_list()?;
        list.set_graphics_layout(Arc::clone(&layout))?;
        list.bind_value(BindParameter::constant(0), &7u32)?;
        list.bind_constants(BindParameter::constant(1), &[0u8; 80])?;
        list.bind_constants(BindParameter::constant(2), &[1u8; 512])?;
        list.draw(3, 1, 0, 0)
    }));
    ctx.run_graph(&graph, 0).unwrap();

    let lists = ctx.dummy.submitted_lists();
    let commands = &lists[0].commands;
    assert!(commands.iter().any(|command| matches!(
        command,
        Command::SetRootConstants { slot: 0, words, .. } if words == &vec![7]
    )));
    assert!(commands.iter().any(|command| matches!(
        command,
        Command::SetRootConstants { slot: 1, words, .. } if words.len() == 20
    )));
    assert!(commands
        .iter()
        .any(|command| matches!(command, Command::SetRootBufferView { slot: 2, .. })));
}

#[test]
fn test_rebinding_between_draws_duplicates_table() {
    let mut ctx = TestContext::new();
    let first = ctx.texture(4, 4);
    let second = ctx.texture(4, 4);
    let layout = Arc::new(
        BindingLayout::compile(&[BindParameterDesc::texture(0), BindParameterDesc::sampler(0)])
            .unwrap(),
    );

    let mut graph = NodeGraph::new();
    graph.add_node(task_node("draws", move |ctx| {
        let list = ctx.graphics_list()?;
        list.set_graphics_layout(Arc::clone(&layout))?;
        list.bind_sampler(BindParameter::sampler(0), FilterMode::Linear, AddressMode::Clamp)?;
        list.bind_texture(BindParameter::texture(0), &first, None)?;
        list.draw(3, 1, 0, 0)?;
        list.bind_texture(BindParameter::texture(0), &second, None)?;
        list.draw(3, 1, 0, 0)
    }));
    ctx.run_graph(&graph, 0).unwrap();

    let lists = ctx.dummy.submitted_lists();
    let tables: Vec<_> = lists[0]
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::SetRootTable { slot, base, .. } => Some((*slot, *base)),
            _ => None,
        })
        .collect();
    // one resource table per draw, sampler table set once
    assert_eq!(tables.len(), 3);
    assert_ne!(tables[0].1, tables[2].1);
}

// ============================================================================
// Failures
// ============================================================================

#[rstest]
#[case::error(false)]
#[case::panic(true)]
fn test_task_failure_skips_dependents(#[case] panics: bool) {
    let mut ctx = TestContext::new();
    let reached = Arc::new(Mutex::new(false));

    let mut graph = NodeGraph::new();
    let failing = graph.add_node(task_node("failing", move |_| {
        if panics {
            panic!("task body panicked");
        }
        Err(FrameError::InvalidBinding("missing slot".to_string()))
    }));
    let flag = Arc::clone(&reached);
    let dependent = graph.add_node(task_node("dependent", move |_| {
        *flag.lock() = true;
        Ok(())
    }));
    graph.add_dependency(dependent, failing).unwrap();

    let err = ctx.run_graph(&graph, 0).unwrap_err();
    if panics {
        assert_eq!(
            err,
            FrameError::TaskPanicked {
                task: "failing".to_string()
            }
        );
    } else {
        assert!(matches!(err, FrameError::InvalidBinding(_)));
    }
    assert!(!*reached.lock());

    // the scheduler stays usable
    let mut graph = NodeGraph::new();
    graph.add_node(task_node("ok", |_| Ok(())));
    ctx.run_graph(&graph, 1).unwrap();
}

#[test]
fn test_missing_capability_reported() {
    let mut ctx = TestContext::new();
    let target = ctx.texture(4, 4);
    let mut graph = NodeGraph::new();
    graph.add_node(task_node("wrong_list", move |ctx| {
        let list = ctx.copy_list()?;
        list.clear_render_target(&target, [0.0; 4])
    }));

    let err = ctx.run_graph(&graph, 0).unwrap_err();
    assert!(matches!(err, FrameError::MissingCapability { .. }));
    assert!(ctx.dummy.submitted_lists().is_empty());
}

#[test]
fn test_device_loss_presents_fallback_frame() {
    let color = [0.25, 0.5, 0.75, 1.0];
    let mut ctx =
        TestContext::with_config(SchedulerConfig::default().with_fallback_clear_color(color));
    let back_buffer = ctx.texture(32, 32);

    let fatal = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fatal);
    ctx.scheduler.set_fatal_handler(Arc::new(move |err| sink.lock().push(err)));
    let reported = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&reported);
    ctx.scheduler.set_error_callback(Arc::new(move |_| *counter.lock() += 1));

    let mut graph = NodeGraph::new();
    graph.add_node(clear_node("scene", &back_buffer, [0.0; 4]));
    ctx.scheduler.set_pipeline(&graph).unwrap();

    ctx.dummy.fail_next_submit(1);
    let frame = FrameContext::new(0, Duration::ZERO).with_back_buffer(back_buffer.clone());
    let err = ctx.scheduler.execute(&frame).unwrap_err();
    ctx.scheduler.wait_idle().unwrap();

    assert!(err.is_fatal());
    assert_eq!(fatal.lock().len(), 1);
    assert!(*reported.lock() >= 1);
    assert_eq!(back_buffer.state(0), ResourceState::PRESENT);
    let lists = ctx.dummy.submitted_lists();
    assert!(lists.iter().any(|list| list.commands.iter().any(|command| matches!(
        command,
        Command::ClearRenderTarget { color: c, .. } if *c == color
    ))));
}

#[test]
fn test_setup_rejects_write_conflict() {
    let mut ctx = TestContext::new();
    let target = ctx.texture(4, 4);
    let mut graph = NodeGraph::new();
    graph.add_node(Arc::new(FnNode::new("conflict", move || {
        let target = target.clone();
        TaskFragment::single(FnTask::new("conflict", |_| Ok(())).with_setup(move |ctx| {
            ctx.declare_usage(&target, Subresource::All, ResourceState::RENDER_TARGET)?;
            ctx.declare_usage(&target, Subresource::All, ResourceState::PIXEL_SHADER_RESOURCE)
        }))
    })));

    let err = ctx.run_graph(&graph, 0).unwrap_err();
    assert!(matches!(err, FrameError::InvalidUsage(_)));
}

// ============================================================================
// Lifetime
// ============================================================================

#[test]
fn test_frames_in_flight_advance() {
    let mut ctx = TestContext::with_config(SchedulerConfig::default().with_frames_in_flight(2));
    let target = ctx.texture(8, 8);
    let mut graph = NodeGraph::new();
    graph.add_node(clear_node("clear", &target, [0.0; 4]));
    ctx.scheduler.set_pipeline(&graph).unwrap();

    let mut last = 0;
    for index in 0..6 {
        let point = ctx
            .scheduler
            .execute(&FrameContext::new(index, Duration::from_millis(16)))
            .unwrap();
        assert!(point.value() > last);
        last = point.value();
    }
    ctx.scheduler.wait_idle().unwrap();
    assert_eq!(ctx.dummy.submitted_lists().len(), 6);
}

#[test]
fn test_reset_releases_pooled_objects() {
    let mut ctx = TestContext::new();
    let target = ctx.texture(8, 8);
    let layout = Arc::new(BindingLayout::compile(&[BindParameterDesc::texture(0)]).unwrap());
    let sampled = ctx.texture(8, 8);

    let mut graph = NodeGraph::new();
    graph.add_node(clear_node("clear", &target, [0.0; 4]));
    graph.add_node(task_node("sample", move |ctx| {
        let list = ctx.graphics_list()?;
        list.set_graphics_layout(Arc::clone(&layout))?;
        list.bind_texture(BindParameter::texture(0), &sampled, None)?;
        list.draw(3, 1, 0, 0)
    }));
    for index in 0..3 {
        ctx.run_graph(&graph, index).unwrap();
    }
    assert!(ctx.dummy.live_command_list_count() > 0);

    ctx.scheduler.reset().unwrap();
    assert_eq!(ctx.dummy.live_command_list_count(), 0);
    assert_eq!(ctx.dummy.live_descriptor_heap_count(), 0);
}
