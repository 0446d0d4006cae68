use pretty_assertions::assert_eq;
use tidal_core::builder::ModuleBuilder;
use tidal_core::{
    persist, ClockEdge, Delay, Instruction, Module, ProcessId, SignalId, SignalKind, StructField,
    StructType, Type, Value,
};
use tidal_lower::{Config, DiagnosticBuffer, LowerError, Pipeline, PipelineSummary};

fn run_pipeline(module: &mut Module) -> (Result<PipelineSummary, LowerError>, DiagnosticBuffer) {
    let mut sink = DiagnosticBuffer::new();
    let pipeline = Pipeline::with_defaults();
    let result = pipeline.run(module, &mut sink);
    (result, sink)
}

/// A clocked process in frontend shape: old clock sample threaded through the
/// resume block's parameter, an if/else writing two different constants, and
/// a fresh sample taken before suspending again.
fn scenario_a_module() -> (Module, ProcessId, SignalId, SignalId, SignalId) {
    let mut builder = ModuleBuilder::new("scenario_a");
    let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
    let sel = builder.signal("sel", Type::Bool, SignalKind::Input);
    let q = builder.signal("q", Type::Uint(8), SignalKind::Output);
    let mut proc = builder.process("register_proc");

    let entry = proc.entry_block_id();
    let check = proc.create_block_id();
    let body = proc.create_block_id();
    let take_one = proc.create_block_id();
    let take_zero = proc.create_block_id();
    let done = proc.create_block_id();

    proc.switch_to_block(entry).unwrap();
    let old0 = proc.probe(clk);
    proc.wait(check, vec![old0], vec![clk, sel]);

    proc.switch_to_block(check).unwrap();
    let old = proc.block_param(check, "old", Type::Bool).unwrap();
    let new = proc.probe(clk);
    let s = proc.probe(sel);
    let not_old = proc.not_(old);
    let edge = proc.and_(new, not_old);
    proc.branch(edge, body, done);

    proc.switch_to_block(body).unwrap();
    proc.branch(s, take_one, take_zero);

    proc.switch_to_block(take_one).unwrap();
    proc.drive(q, Value::uint(1, 8), Delay::delta(), None);
    proc.jump(done);

    proc.switch_to_block(take_zero).unwrap();
    proc.drive(q, Value::uint(0, 8), Delay::delta(), None);
    proc.jump(done);

    proc.switch_to_block(done).unwrap();
    let old1 = proc.probe(clk);
    proc.wait(check, vec![old1], vec![clk, sel]);

    let id = proc.build().unwrap();
    (builder.build(), id, clk, sel, q)
}

#[test]
fn scenario_a_if_else_constants_become_a_muxed_register() {
    let (mut module, id, clk, sel, q) = scenario_a_module();

    let (result, sink) = run_pipeline(&mut module);
    let summary = result.unwrap();

    assert!(sink.is_empty(), "{:?}", sink.iter().collect::<Vec<_>>());
    assert_eq!(summary.converted, 1);
    assert_eq!(summary.retained, 0);
    assert!(module.process(id).is_none());

    assert_eq!(module.body.registers.len(), 1);
    let reg = &module.body.registers[0];
    assert_eq!(reg.signal, q);
    assert_eq!(reg.clock, clk);
    assert_eq!(reg.edge, ClockEdge::Rising);
    assert!(reg.enable.is_none());
    assert!(reg.reset.is_none());

    // the register input is a mux of the two constants, selected by the
    // original branch condition (the probe of sel)
    let data_inst = module
        .body
        .combinational
        .iter()
        .find(|inst| inst.result() == Some(&reg.data));
    let Some(Instruction::Mux {
        condition,
        then_val,
        else_val,
        ..
    }) = data_inst
    else {
        panic!("register data is not a mux: {:?}", data_inst);
    };
    assert_eq!(*then_val, Value::uint(1, 8));
    assert_eq!(*else_val, Value::uint(0, 8));
    let sel_probe = module
        .body
        .combinational
        .iter()
        .find(|inst| matches!(inst, Instruction::Probe { signal, .. } if *signal == sel));
    assert_eq!(sel_probe.and_then(|i| i.result()), Some(condition));
}

fn pair_type() -> Type {
    Type::Struct(StructType::new(vec![
        StructField::new("lo", Type::Uint(4)),
        StructField::new("hi", Type::Uint(4)),
    ]))
}

#[test]
fn scenario_b_disjoint_field_drives_fuse_into_one_aggregate_drive() {
    let mut builder = ModuleBuilder::new("scenario_b");
    let a = builder.signal("a", Type::Uint(4), SignalKind::Input);
    let b = builder.signal("b", Type::Uint(4), SignalKind::Input);
    let s = builder.signal("s", pair_type(), SignalKind::Output);
    let mut proc = builder.process("fields");

    let entry = proc.entry_block_id();
    proc.switch_to_block(entry).unwrap();
    let va = proc.probe(a);
    let vb = proc.probe(b);
    proc.drive_field(s, 0, va, Delay::delta(), None);
    proc.drive_field(s, 1, vb, Delay::delta(), None);
    proc.wait(entry, vec![], vec![a, b]);

    let id = proc.build().unwrap();
    let mut module = builder.build();

    let (result, _) = run_pipeline(&mut module);
    result.unwrap();

    // the process stays (no clock anywhere), but its two field drives became
    // one whole-aggregate drive assembled from both pieces
    let body = &module.process(id).unwrap().body;
    let block = body.block(entry).unwrap();
    let drives: Vec<&Instruction> = block.instructions.iter().filter(|i| i.is_drive()).collect();
    assert_eq!(drives.len(), 1);
    assert!(matches!(drives[0], Instruction::Drive { field: None, .. }));
    assert!(block
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::StructCreate { fields, .. } if fields.len() == 2)));
}

#[test]
fn scenario_b_clocked_aggregate_process_becomes_an_aggregate_register() {
    let mut builder = ModuleBuilder::new("scenario_b_clocked");
    let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
    let a = builder.signal("a", Type::Uint(4), SignalKind::Input);
    let b = builder.signal("b", Type::Uint(4), SignalKind::Input);
    let s = builder.signal("s", pair_type(), SignalKind::Output);
    let mut proc = builder.process("agg_reg");

    let entry = proc.entry_block_id();
    let check = proc.create_block_id();

    proc.switch_to_block(entry).unwrap();
    let old0 = proc.probe(clk);
    proc.wait(check, vec![old0], vec![clk, a, b]);

    proc.switch_to_block(check).unwrap();
    let old = proc.block_param(check, "old", Type::Bool).unwrap();
    let new = proc.probe(clk);
    let va = proc.probe(a);
    let vb = proc.probe(b);
    let not_old = proc.not_(old);
    let edge = proc.and_(new, not_old);
    let whole = proc.struct_create(vec![va, vb], pair_type());
    proc.drive(s, whole, Delay::delta(), Some(edge));
    let old1 = proc.probe(clk);
    proc.wait(check, vec![old1], vec![clk, a, b]);

    let id = proc.build().unwrap();
    let mut module = builder.build();

    let (result, sink) = run_pipeline(&mut module);
    let summary = result.unwrap();

    assert!(sink.is_empty());
    assert_eq!(summary.converted, 1);
    assert!(module.process(id).is_none());
    assert_eq!(module.body.registers.len(), 1);
    let reg = &module.body.registers[0];
    assert_eq!(reg.signal, s);
    let data_inst = module
        .body
        .combinational
        .iter()
        .find(|inst| inst.result() == Some(&reg.data));
    assert!(matches!(
        data_inst,
        Some(Instruction::StructCreate { fields, .. }) if fields.len() == 2
    ));
}

#[test]
fn scenario_c_two_clock_conjunction_is_diagnosed_and_left_alone() {
    let mut builder = ModuleBuilder::new("scenario_c");
    let clk_a = builder.signal("clk_a", Type::Bool, SignalKind::Input);
    let clk_b = builder.signal("clk_b", Type::Bool, SignalKind::Input);
    let q = builder.signal("q", Type::Bool, SignalKind::Output);
    let mut proc = builder.process("dual_clock");

    let entry = proc.entry_block_id();
    let check = proc.create_block_id();

    proc.switch_to_block(entry).unwrap();
    let a0 = proc.probe(clk_a);
    let b0 = proc.probe(clk_b);
    proc.wait(check, vec![a0, b0], vec![clk_a, clk_b]);

    proc.switch_to_block(check).unwrap();
    let old_a = proc.block_param(check, "old_a", Type::Bool).unwrap();
    let old_b = proc.block_param(check, "old_b", Type::Bool).unwrap();
    let new_a = proc.probe(clk_a);
    let new_b = proc.probe(clk_b);
    let not_old_a = proc.not_(old_a);
    let not_old_b = proc.not_(old_b);
    let edge_a = proc.and_(new_a, not_old_a);
    let edge_b = proc.and_(new_b, not_old_b);
    let both = proc.and_(edge_a, edge_b);
    proc.drive(q, Value::true_(), Delay::delta(), Some(both));
    let a1 = proc.probe(clk_a);
    let b1 = proc.probe(clk_b);
    proc.wait(check, vec![a1, b1], vec![clk_a, clk_b]);

    let id = proc.build().unwrap();
    let mut module = builder.build();

    let (result, sink) = run_pipeline(&mut module);
    let summary = result.unwrap();

    assert_eq!(summary.converted, 0);
    assert_eq!(summary.excluded, 1);
    assert_eq!(sink.warnings().count(), 1);
    assert!(module.process(id).is_some());
    assert!(module.body.registers.is_empty());
}

#[test]
fn scenario_d_ambiguous_region_aborts_without_mutation() {
    let mut builder = ModuleBuilder::new("scenario_d");
    let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
    let q = builder.signal("q", Type::Bool, SignalKind::Output);

    // a second, perfectly fine process that must also remain untouched
    let mut ok_proc = builder.process("fine");
    let ok_entry = ok_proc.entry_block_id();
    ok_proc.switch_to_block(ok_entry).unwrap();
    let v = ok_proc.probe(clk);
    ok_proc.drive(q, v, Delay::delta(), None);
    ok_proc.wait(ok_entry, vec![], vec![clk]);
    ok_proc.build().unwrap();

    // a resume edge and an ordinary edge converge on the same block
    let mut bad_proc = builder.process("tangled");
    let entry = bad_proc.entry_block_id();
    let resumed = bad_proc.create_block_id();
    let join = bad_proc.create_block_id();

    bad_proc.switch_to_block(entry).unwrap();
    bad_proc.branch(Value::true_(), join, resumed);

    bad_proc.switch_to_block(resumed).unwrap();
    bad_proc.wait(join, vec![], vec![clk]);

    bad_proc.switch_to_block(join).unwrap();
    bad_proc.halt();

    bad_proc.build().unwrap();
    let mut module = builder.build();
    let before = persist::module_to_json(&module).unwrap();

    let (result, sink) = run_pipeline(&mut module);

    assert!(matches!(result, Err(LowerError::Structural { .. })));
    assert_eq!(sink.errors().count(), 1);
    let after = persist::module_to_json(&module).unwrap();
    assert_eq!(before, after);
}

#[test]
fn conversion_is_all_or_nothing_per_process() {
    let mut builder = ModuleBuilder::new("mixed");
    let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
    let d = builder.signal("d", Type::Bool, SignalKind::Input);
    let gate = builder.signal("gate", Type::Bool, SignalKind::Input);
    let q1 = builder.signal("q1", Type::Bool, SignalKind::Output);
    let q2 = builder.signal("q2", Type::Bool, SignalKind::Output);
    let mut proc = builder.process("mixed");

    let entry = proc.entry_block_id();
    let check = proc.create_block_id();

    proc.switch_to_block(entry).unwrap();
    let old0 = proc.probe(clk);
    proc.wait(check, vec![old0], vec![clk, d, gate]);

    proc.switch_to_block(check).unwrap();
    let old = proc.block_param(check, "old", Type::Bool).unwrap();
    let new = proc.probe(clk);
    let vd = proc.probe(d);
    let vgate = proc.probe(gate);
    let not_old = proc.not_(old);
    let edge = proc.and_(new, not_old);
    // q1 is a clean clocked register; q2 has no edge in its enable
    proc.drive(q1, vd.clone(), Delay::delta(), Some(edge));
    proc.drive(q2, vd, Delay::delta(), Some(vgate));
    let old1 = proc.probe(clk);
    proc.wait(check, vec![old1], vec![clk, d, gate]);

    let id = proc.build().unwrap();
    let mut module = builder.build();
    let before = format!("{}", module.process(id).unwrap());

    let (result, sink) = run_pipeline(&mut module);
    let summary = result.unwrap();

    assert_eq!(summary.converted, 0);
    assert_eq!(sink.warnings().count(), 1);
    assert!(module.body.registers.is_empty());
    assert_eq!(before, format!("{}", module.process(id).unwrap()));
}

#[test]
fn pipeline_is_idempotent_on_its_own_output() {
    let (mut module, _, _, _, _) = scenario_a_module();

    let (first, _) = run_pipeline(&mut module);
    first.unwrap();
    let lowered = persist::module_to_json(&module).unwrap();

    let (second, sink) = run_pipeline(&mut module);
    let summary = second.unwrap();

    assert!(!summary.changed);
    assert!(sink.is_empty());
    assert_eq!(lowered, persist::module_to_json(&module).unwrap());
}

#[test]
fn idempotent_on_retained_processes_too() {
    let mut builder = ModuleBuilder::new("retained");
    let a = builder.signal("a", Type::Uint(4), SignalKind::Input);
    let b = builder.signal("b", Type::Uint(4), SignalKind::Input);
    let s = builder.signal("s", pair_type(), SignalKind::Output);
    let mut proc = builder.process("fields");

    let entry = proc.entry_block_id();
    proc.switch_to_block(entry).unwrap();
    let va = proc.probe(a);
    let vb = proc.probe(b);
    proc.drive_field(s, 0, va, Delay::delta(), None);
    proc.drive_field(s, 1, vb, Delay::delta(), None);
    proc.wait(entry, vec![], vec![a, b]);

    proc.build().unwrap();
    let mut module = builder.build();

    let (first, _) = run_pipeline(&mut module);
    first.unwrap();
    let lowered = persist::module_to_json(&module).unwrap();

    let (second, _) = run_pipeline(&mut module);
    let summary = second.unwrap();

    assert!(!summary.changed);
    assert_eq!(lowered, persist::module_to_json(&module).unwrap());
}

#[test]
fn lowered_module_survives_a_persist_round_trip() {
    let (mut module, _, _, _, _) = scenario_a_module();
    let (result, _) = run_pipeline(&mut module);
    result.unwrap();

    let json = persist::module_to_json(&module).unwrap();
    let reloaded = persist::module_from_json(&json).unwrap();

    assert_eq!(format!("{}", module), format!("{}", reloaded));
}

#[test]
fn rejects_zero_primitive_budget_before_touching_ir() {
    let (mut module, _, _, _, _) = scenario_a_module();
    let before = persist::module_to_json(&module).unwrap();

    let err = Pipeline::new(Config { max_primitives: 0 }).err();
    assert!(matches!(err, Some(LowerError::Config(_))));
    assert_eq!(before, persist::module_to_json(&module).unwrap());
}
