//! Entry points the dispatch loop calls while a traced method executes.
//!
//! Each activation owns one [`MethodTracer`]. Instruction hooks rewrite
//! symbol operands through the shared store before recording; return hooks
//! consume the tracer, flatten its tree and intern the result as a code record.
//! Failures are logged and never reach the interpreted program.

use tracing::{debug, warn};

use crate::derive::narrow;
use crate::dumper::Dumper;
use crate::error::DumpResult;
use crate::records::{CodeRecord, SymbolKind};
use crate::rewrite::{self, FieldAccess, InvokeForm};
use crate::source::{Frame, MethodInfo, SourceUnit};
use crate::trace::{FillArrayPayload, TraceBuilder, TraceEvent};

/// Instruction width of if-test and switch instructions, in code units.
const IF_WIDTH: i32 = 2;
const SWITCH_WIDTH: i32 = 3;

pub struct MethodTracer<'a> {
    dumper: &'a Dumper,
    unit: &'a dyn SourceUnit,
    method: MethodInfo,
    builder: TraceBuilder,
    last_throw: Option<u8>,
    exception_offset: i32,
}

impl<'a> MethodTracer<'a> {
    pub fn new(dumper: &'a Dumper, unit: &'a dyn SourceUnit, method: MethodInfo) -> Self {
        Self {
            dumper,
            unit,
            method,
            builder: TraceBuilder::new(),
            last_throw: None,
            exception_offset: 0,
        }
    }

    pub fn method(&self) -> &MethodInfo {
        &self.method
    }

    pub fn builder(&self) -> &TraceBuilder {
        &self.builder
    }

    /// Records an instruction that carries no symbol operand.
    pub fn instruction(&mut self, pc: u32, units: &[u16]) {
        self.builder.record(pc, TraceEvent::Linear(units.to_vec()));
    }

    pub fn const_string(&mut self, pc: u32, units: &[u16], string_idx: u32) {
        let inst = units.first().copied().unwrap_or_default();
        let store = self.dumper.store();
        let rewritten = self.rewrite_or_keep(units, || {
            let index = store.string_from_unit(self.unit, string_idx)?;
            Ok(rewrite::const_string(inst, index))
        });
        self.builder.record(pc, TraceEvent::Linear(rewritten));
    }

    pub fn type_ref(&mut self, pc: u32, units: &[u16], type_idx: u32) {
        let store = self.dumper.store();
        let rewritten = self.rewrite_or_keep(units, || {
            let index = store.type_from_unit(self.unit, type_idx)?;
            Ok(rewrite::type_ref(units, index))
        });
        self.builder.record(pc, TraceEvent::Linear(rewritten));
    }

    pub fn field_access(&mut self, pc: u32, units: &[u16], access: FieldAccess, field_idx: u32) {
        let store = self.dumper.store();
        let rewritten = self.rewrite_or_keep(units, || {
            let index = narrow(SymbolKind::Field, store.field_from_unit(self.unit, field_idx)?)?;
            Ok(rewrite::field_access(units, access, index))
        });
        self.builder.record(pc, TraceEvent::Linear(rewritten));
    }

    pub fn invoke(&mut self, pc: u32, units: &[u16], form: InvokeForm, method_idx: u32) {
        let store = self.dumper.store();
        let rewritten = self.rewrite_or_keep(units, || {
            let index = narrow(SymbolKind::Method, store.method_from_unit(self.unit, method_idx)?)?;
            Ok(rewrite::invoke(units, form, index))
        });
        self.builder.record(pc, TraceEvent::Linear(rewritten));
    }

    fn rewrite_or_keep(
        &self,
        units: &[u16],
        rewrite: impl FnOnce() -> DumpResult<Vec<u16>>,
    ) -> Vec<u16> {
        rewrite().unwrap_or_else(|err| {
            warn!("recording instruction unrewritten: {err}");
            units.to_vec()
        })
    }

    /// Remembers the thrown register; the throw itself is not recorded so the
    /// catching `move-exception` reads as straight-line code.
    pub fn throw(&mut self, reg: u8) {
        self.last_throw = Some(reg);
    }

    /// Only recorded when this activation threw; the catch becomes a plain register move.
    pub fn move_exception(&mut self, pc: u32, dest: u8) {
        if let Some(thrown) = self.last_throw {
            self.builder.record(
                pc,
                TraceEvent::Linear(rewrite::move_exception(dest, thrown)),
            );
        }
    }

    pub fn goto(&mut self, pc: u32, offset: i32) {
        self.builder.record(
            pc,
            TraceEvent::Goto {
                target: pc.wrapping_add_signed(offset),
            },
        );
    }

    /// `offset` is the distance actually travelled; the instruction width means fall-through.
    pub fn if_branch(&mut self, pc: u32, inst: u16, offset: i32) {
        self.builder.record(
            pc,
            TraceEvent::If {
                inst,
                taken: offset != IF_WIDTH,
                target: pc.wrapping_add_signed(offset),
            },
        );
    }

    pub fn switch(&mut self, pc: u32, inst: u16, key: i32, offset: i32) {
        let selector = (offset != SWITCH_WIDTH).then_some(key);
        self.builder.record(
            pc,
            TraceEvent::Switch {
                inst,
                selector,
                target: pc.wrapping_add_signed(offset),
            },
        );
    }

    pub fn fill_array_data(&mut self, pc: u32, inst: u16, payload: FillArrayPayload) {
        self.builder
            .record(pc, TraceEvent::FillArray { inst, payload });
    }

    /// Offset a forced-branch rule imposes at `pc`, consumed on first use.
    pub fn force_branch(&self, pc: u32) -> Option<i32> {
        let offset = self
            .dumper
            .resolve_force_branch(self.unit, self.method.method_idx, pc)?;
        debug!(pc, offset, "forcing branch");
        Some(offset)
    }

    /// Offset to continue at instead of unwinding an uncaught exception, while forcing.
    pub fn ignore_exception_offset(&self) -> Option<i32> {
        self.dumper
            .force_execution()
            .then_some(self.exception_offset)
    }

    pub fn set_exception_offset(&mut self, offset: i32) {
        self.exception_offset = offset;
    }

    pub fn on_return(mut self, pc: u32, units: &[u16], frame: &dyn Frame) -> Option<u32> {
        self.instruction(pc, units);
        self.finish(frame)
    }

    pub fn on_exception_return(mut self, pc: u32, frame: &dyn Frame) -> Option<u32> {
        self.builder
            .record(pc, TraceEvent::Linear(rewrite::exception_return()));
        self.finish(frame)
    }

    /// `return-void-no-barrier` and friends.
    pub fn on_special_return(mut self, pc: u32, units: &[u16], frame: &dyn Frame) -> Option<u32> {
        self.builder
            .record(pc, TraceEvent::Linear(rewrite::special_return(units)));
        self.finish(frame)
    }

    fn finish(self, frame: &dyn Frame) -> Option<u32> {
        let insns = self.builder.flatten();
        let store = self.dumper.store();
        let implicit = match store.implicit_encoded_method(self.unit, &self.method, frame) {
            Ok(implicit) => implicit,
            Err(err) => {
                warn!(method = self.method.method_idx, "dropping trace: {err}");
                return None;
            }
        };
        let index = store.intern(
            self.unit.location(),
            CodeRecord {
                method_idx: implicit.method_idx,
                class_name_idx: implicit.class_name_idx,
                registers: self.method.registers,
                ins: self.method.ins,
                outs: self.method.outs,
                insns,
            },
        );
        debug!(
            method = implicit.method_idx,
            code = index,
            segments = self.builder.segment_count(),
            "trace dumped"
        );
        Some(index)
    }
}
