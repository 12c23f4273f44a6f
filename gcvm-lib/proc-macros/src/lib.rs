use proc_macro::TokenStream;
mod opcode;

/// Used on the OpCode enum.
///
/// An opcode is a one byte id, optionally followed by a single operand.
/// Enums lend themselves naturally to this, but the instructions have to exist
/// as a flat byte sequence, so the enum is encoded as its opcode byte followed by
/// the little endian bytes of the operand. Every variant must have an explicit
/// discriminant (its opcode byte) and zero or one unnamed field.
///
/// This Macro generates the following:
/// * a `pub const NAME: u8` for each variant, where NAME is the upper cased variant name
/// * Self::byte(&self) -> u8
/// * Self::serialized_size_of(u8) -> `Option<usize>`
/// * Self::serialized_size(&self) -> usize
/// * Self::to_bytes(&self) -> `Vec<u8>`
/// * Self::decode(&[u8]) -> `Result<Self, DecodeError>`
///   `DecodeError` must be in scope where the derive is used, and have the variants
///   `Empty`, `Unknown(u8)` and `Truncated(u8)`
/// * Self::operand(&self) -> `Option<Operand>`
/// * Self::takes_operand(&str) -> `Option<bool>`
/// * Self::from_mnemonic(&str, `Option<Operand>`) -> `Option<Self>`
///   a variant can be given additional spellings with `#[opcode(alias = "NAME")]`
#[proc_macro_derive(OpCode, attributes(opcode))]
pub fn convert(tokens: TokenStream) -> TokenStream {
    opcode::opcode_impl(tokens)
}
