//! Rewrites executed instructions so their operands point into the interned tables.

pub const OP_MOVE_FROM16: u16 = 0x02;
pub const OP_CONST_STRING_JUMBO: u16 = 0x1B;
pub const OP_INVOKE_VIRTUAL: u16 = 0x6E;
pub const OP_INVOKE_VIRTUAL_RANGE: u16 = 0x74;
pub const OP_RETURN_VOID: u16 = 0x0e;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldAccess {
    Get,
    Put,
    /// Quickened instance get; the opcode is restored to its resolved form.
    QuickGet,
    QuickPut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeForm {
    Standard,
    Quick { range: bool },
}

fn opcode(unit: u16) -> u8 {
    (unit & 0xff) as u8
}

fn with_opcode(unit: u16, opcode: u16) -> u16 {
    (unit & 0xff00) | opcode
}

fn replace_index(units: &[u16], index: u16) -> Vec<u16> {
    let mut out = units.to_vec();
    if let Some(unit) = out.get_mut(1) {
        *unit = index;
    }
    out
}

/// `const-string` and `const-string/jumbo` both become the jumbo form.
pub fn const_string(inst: u16, string_idx: u32) -> Vec<u16> {
    vec![
        with_opcode(inst, OP_CONST_STRING_JUMBO),
        string_idx as u16,
        (string_idx >> 16) as u16,
    ]
}

pub fn type_ref(units: &[u16], type_idx: u16) -> Vec<u16> {
    replace_index(units, type_idx)
}

pub fn field_access(units: &[u16], access: FieldAccess, field_idx: u16) -> Vec<u16> {
    let mut out = replace_index(units, field_idx);
    let Some(first) = out.first_mut() else {
        return out;
    };
    let restored = match (access, opcode(*first)) {
        (FieldAccess::Get | FieldAccess::Put, _) => None,
        (FieldAccess::QuickGet, 0xE3) => Some(0x52),
        (FieldAccess::QuickGet, 0xE4) => Some(0x53),
        (FieldAccess::QuickGet, _) => Some(0x54),
        (FieldAccess::QuickPut, 0xE6) => Some(0x59),
        (FieldAccess::QuickPut, 0xE7) => Some(0x5A),
        (FieldAccess::QuickPut, _) => Some(0x5B),
    };
    if let Some(op) = restored {
        *first = with_opcode(*first, op);
    }
    out
}

pub fn invoke(units: &[u16], form: InvokeForm, method_idx: u16) -> Vec<u16> {
    let mut out = replace_index(units, method_idx);
    if let InvokeForm::Quick { range } = form
        && let Some(first) = out.first_mut()
    {
        let op = if range {
            OP_INVOKE_VIRTUAL_RANGE
        } else {
            OP_INVOKE_VIRTUAL
        };
        *first = with_opcode(*first, op);
    }
    out
}

/// A caught exception is recorded as a register move from the thrown register.
pub fn move_exception(dest: u8, thrown: u8) -> Vec<u16> {
    vec![OP_MOVE_FROM16 | (u16::from(dest) << 8), u16::from(thrown)]
}

pub fn exception_return() -> Vec<u16> {
    vec![OP_RETURN_VOID]
}

/// `return-void-no-barrier` keeps its width but records as `return-void`.
pub fn special_return(units: &[u16]) -> Vec<u16> {
    let mut out = units.to_vec();
    match out.first_mut() {
        Some(first) => *first = OP_RETURN_VOID,
        None => out.push(OP_RETURN_VOID),
    }
    out
}
