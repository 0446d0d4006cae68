use crate::block::Terminator;
use crate::instructions::{DriveField, Instruction};
use crate::module::Module;
use crate::process::Process;
use crate::signal::SignalKind;
use std::fmt;

/// Human-readable dump of modules and processes. Diagnostic output only; the
/// in-memory graph is the interchange representation.
impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {} {{", self.name)?;
        for signal in self.signals.values() {
            let kind = match signal.kind {
                SignalKind::Input => "input",
                SignalKind::Output => "output",
                SignalKind::Internal => "signal",
            };
            writeln!(f, "  {} {} {}: {}", kind, signal.id, signal.name, signal.ty)?;
        }
        for inst in &self.body.combinational {
            writeln!(f, "  {}", format_instruction(inst))?;
        }
        for reg in &self.body.registers {
            write!(
                f,
                "  reg {} clock {} {} data {}",
                reg.signal, reg.edge, reg.clock, reg.data
            )?;
            if let Some(en) = &reg.enable {
                write!(f, " enable {}", en)?;
            }
            if let Some(reset) = &reg.reset {
                let pol = if reset.active_high { "high" } else { "low" };
                write!(f, " reset {} active-{} to {}", reset.signal, pol, reset.value)?;
            }
            writeln!(f)?;
        }
        for process in self.processes.values() {
            write!(f, "{}", process)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  process {} {{", self.name)?;
        for (block_id, block) in &self.body.blocks {
            write!(f, "    {}", block_id)?;
            if !block.params.is_empty() {
                write!(f, "(")?;
                for (i, param) in block.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", param.name, param.param_type)?;
                }
                write!(f, ")")?;
            }
            writeln!(f, ":")?;
            for inst in &block.instructions {
                writeln!(f, "      {}", format_instruction(inst))?;
            }
            writeln!(f, "      {}", format_terminator(&block.terminator))?;
        }
        writeln!(f, "  }}")
    }
}

fn format_instruction(inst: &Instruction) -> String {
    match inst {
        Instruction::And {
            result,
            left,
            right,
        } => format!("{} = and {}, {}", result, left, right),
        Instruction::Or {
            result,
            left,
            right,
        } => format!("{} = or {}, {}", result, left, right),
        Instruction::Xor {
            result,
            left,
            right,
        } => format!("{} = xor {}, {}", result, left, right),
        Instruction::Not { result, operand } => format!("{} = not {}", result, operand),
        Instruction::Eq {
            result,
            left,
            right,
        } => format!("{} = eq {}, {}", result, left, right),
        Instruction::Ne {
            result,
            left,
            right,
        } => format!("{} = ne {}, {}", result, left, right),
        Instruction::Add {
            result,
            left,
            right,
            ..
        } => format!("{} = add {}, {}", result, left, right),
        Instruction::Sub {
            result,
            left,
            right,
            ..
        } => format!("{} = sub {}, {}", result, left, right),
        Instruction::Mux {
            result,
            condition,
            then_val,
            else_val,
        } => format!("{} = mux {}, {}, {}", result, condition, then_val, else_val),
        Instruction::StructCreate { result, fields, .. } => {
            let parts: Vec<String> = fields.iter().map(|v| v.to_string()).collect();
            format!("{} = struct {{{}}}", result, parts.join(", "))
        }
        Instruction::ExtractField {
            result,
            aggregate,
            index,
        } => format!("{} = field {}, {}", result, aggregate, index),
        Instruction::Probe { result, signal } => format!("{} = probe {}", result, signal),
        Instruction::Drive {
            signal,
            field,
            value,
            delay,
            enable,
        } => {
            let mut s = format!("drive {}", signal);
            match field {
                Some(DriveField::Index(i)) => s.push_str(&format!(".{}", i)),
                Some(DriveField::Dynamic(v)) => s.push_str(&format!(".[{}]", v)),
                None => {}
            }
            s.push_str(&format!(", {} after {}", value, delay));
            if let Some(en) = enable {
                s.push_str(&format!(" if {}", en));
            }
            s
        }
    }
}

fn format_terminator(term: &Terminator) -> String {
    let args = |values: &[crate::values::Value]| -> String {
        if values.is_empty() {
            String::new()
        } else {
            let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            format!("({})", parts.join(", "))
        }
    };
    match term {
        Terminator::Jump(dest, a) => format!("jump {}{}", dest, args(a)),
        Terminator::Branch {
            condition,
            then_block,
            then_args,
            else_block,
            else_args,
        } => format!(
            "branch {}, {}{}, {}{}",
            condition,
            then_block,
            args(then_args),
            else_block,
            args(else_args)
        ),
        Terminator::Wait {
            dest,
            dest_args,
            sensitivity,
        } => {
            let sens: Vec<String> = sensitivity.iter().map(|s| s.to_string()).collect();
            format!("wait [{}], {}{}", sens.join(", "), dest, args(dest_args))
        }
        Terminator::Halt => "halt".to_string(),
        Terminator::Invalid => "<invalid>".to_string(),
    }
}
