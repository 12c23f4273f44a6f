use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Expr, Ident, ItemEnum, LitStr, Type};

/// Everything the generators need to know about one variant
struct VariantInfo<'a> {
    name: &'a Ident,
    const_name: Ident,
    byte: &'a Expr,
    operand: Option<&'a Type>,
    aliases: Vec<String>,
}

pub fn opcode_impl(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as ItemEnum);
    let enum_name = &input.ident;
    assert!(input.variants.len() <= 256, "Too many variants for a one byte opcode");

    let infos: Vec<_> = input.variants.iter().map(variant_info).collect();

    let operand_types: Vec<_> = infos.iter().filter_map(|i| i.operand).collect();
    let operand_ty = match operand_types.first() {
        Some(ty) => {
            assert!(
                operand_types.iter().all(|other| other == ty),
                "All variants with an operand must use the same operand type"
            );
            quote! { #ty }
        }
        None => quote! { () },
    };

    let consts = generate_consts(&infos);
    let byte_fn = generate_byte_fn(&infos);
    let size_fns = generate_size_fns(&infos);
    let to_bytes_fn = generate_to_bytes_fn(&infos);
    let decode_fn = generate_decode_fn(&infos);
    let mnemonic_fns = generate_mnemonic_fns(&infos, &operand_ty);

    quote! {
        #consts
        impl #enum_name {
            #byte_fn
            #size_fns
            #to_bytes_fn
            #decode_fn
            #mnemonic_fns
        }
    }
    .into()
}

fn variant_info(v: &syn::Variant) -> VariantInfo<'_> {
    let operand = match v.fields {
        syn::Fields::Unit => None,
        syn::Fields::Named(_) => {
            panic!("Only variants with zero or one unnamed field allowed")
        }
        syn::Fields::Unnamed(ref fields) => {
            assert!(
                fields.unnamed.iter().len() == 1,
                "Only variants with zero or one unnamed field allowed"
            );
            fields.unnamed.iter().next().map(|f| &f.ty)
        }
    };
    let Some((_, byte)) = &v.discriminant else {
        panic!("Variant {} needs an explicit opcode byte as discriminant", v.ident);
    };

    let mut aliases = vec![];
    for attr in v.attrs.iter().filter(|a| a.path().is_ident("opcode")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("alias") {
                let alias: LitStr = meta.value()?.parse()?;
                aliases.push(alias.value());
                Ok(())
            } else {
                Err(meta.error("unsupported opcode attribute"))
            }
        })
        .expect("malformed #[opcode(..)] attribute");
    }

    VariantInfo {
        name: &v.ident,
        const_name: ident_to_upper(&v.ident),
        byte,
        operand,
        aliases,
    }
}

/// generates a `pub const NAME: u8` for every opcode byte
fn generate_consts(infos: &[VariantInfo]) -> TokenStream2 {
    infos
        .iter()
        .map(|info| {
            let const_name = &info.const_name;
            let byte = info.byte;
            quote! { pub const #const_name: u8 = #byte; }
        })
        .collect()
}

fn generate_byte_fn(infos: &[VariantInfo]) -> TokenStream2 {
    let arms: TokenStream2 = infos
        .iter()
        .map(|info| {
            let (name, const_name) = (info.name, &info.const_name);
            if info.operand.is_some() {
                quote! { Self::#name(_) => #const_name, }
            } else {
                quote! { Self::#name => #const_name, }
            }
        })
        .collect();
    quote! {
        /// the opcode byte of this instruction
        pub fn byte(&self) -> u8 {
            match self {
                #arms
            }
        }
    }
}

/// the encoded size is 1 for the opcode plus the size of the operand, if there is one
fn generate_size_fns(infos: &[VariantInfo]) -> TokenStream2 {
    let arms: TokenStream2 = infos
        .iter()
        .map(|info| {
            let const_name = &info.const_name;
            let size = match info.operand {
                None => quote! { 0 },
                Some(ty) => quote! { std::mem::size_of::<#ty>() },
            };
            quote! { #const_name => Some(1 + #size), }
        })
        .collect();

    quote! {
        /// returns the encoded size of the instruction starting with `byte`,
        /// or None if `byte` is no known opcode
        pub fn serialized_size_of(byte: u8) -> Option<usize> {
            match byte {
                #arms
                _ => None,
            }
        }

        pub fn serialized_size(&self) -> usize {
            Self::serialized_size_of(self.byte()).unwrap_or(1)
        }
    }
}

fn generate_to_bytes_fn(infos: &[VariantInfo]) -> TokenStream2 {
    let arms: TokenStream2 = infos
        .iter()
        .map(|info| {
            let (name, const_name) = (info.name, &info.const_name);
            if info.operand.is_some() {
                quote! {
                    Self::#name(operand) => {
                        let mut bytes = vec![#const_name];
                        bytes.extend_from_slice(&operand.to_le_bytes());
                        bytes
                    }
                }
            } else {
                quote! { Self::#name => vec![#const_name], }
            }
        })
        .collect();
    quote! {
        /// encodes the instruction, operands are little endian
        pub fn to_bytes(&self) -> Vec<u8> {
            match self {
                #arms
            }
        }
    }
}

/// expects `DecodeError` to be in scope where the macro is used
fn generate_decode_fn(infos: &[VariantInfo]) -> TokenStream2 {
    let arms: TokenStream2 = infos
        .iter()
        .map(|info| {
            let (name, const_name) = (info.name, &info.const_name);
            match info.operand {
                Some(ty) => quote! {
                    #const_name => {
                        let mut raw = [0u8; std::mem::size_of::<#ty>()];
                        let operand = code
                            .get(1..1 + raw.len())
                            .ok_or(DecodeError::Truncated(byte))?;
                        raw.copy_from_slice(operand);
                        Ok(Self::#name(<#ty>::from_le_bytes(raw)))
                    }
                },
                None => quote! { #const_name => Ok(Self::#name), },
            }
        })
        .collect();
    quote! {
        /// decodes the instruction at the start of `code`
        pub fn decode(code: &[u8]) -> Result<Self, DecodeError> {
            let Some(&byte) = code.first() else {
                return Err(DecodeError::Empty);
            };
            match byte {
                #arms
                unknown => Err(DecodeError::Unknown(unknown)),
            }
        }
    }
}

/// mnemonics are the upper cased variant names plus any `#[opcode(alias = "..")]`
fn generate_mnemonic_fns(infos: &[VariantInfo], operand_ty: &TokenStream2) -> TokenStream2 {
    let operand_arms: TokenStream2 = infos
        .iter()
        .map(|info| {
            let name = info.name;
            if info.operand.is_some() {
                quote! { Self::#name(operand) => Some(*operand), }
            } else {
                quote! { Self::#name => None, }
            }
        })
        .collect();
    let (takes_arms, build_arms): (TokenStream2, TokenStream2) = infos
        .iter()
        .map(|info| {
            let name = info.name;
            let spellings: Vec<String> = std::iter::once(info.const_name.to_string())
                .chain(info.aliases.iter().cloned())
                .collect();
            let has_operand = info.operand.is_some();
            let build = if has_operand {
                quote! { #(#spellings)|* => operand.map(Self::#name), }
            } else {
                quote! { #(#spellings)|* => match operand {
                    None => Some(Self::#name),
                    Some(_) => None,
                }, }
            };
            (quote! { #(#spellings)|* => Some(#has_operand), }, build)
        })
        .unzip();

    quote! {
        pub fn operand(&self) -> Option<#operand_ty> {
            match self {
                #operand_arms
            }
        }

        /// Some(true) if the mnemonic names an instruction with an operand,
        /// None if the mnemonic is unknown
        pub fn takes_operand(mnemonic: &str) -> Option<bool> {
            match mnemonic {
                #takes_arms
                _ => None,
            }
        }

        /// builds the instruction for `mnemonic`. Returns None for unknown mnemonics
        /// and for a missing or superfluous operand
        pub fn from_mnemonic(mnemonic: &str, operand: Option<#operand_ty>) -> Option<Self> {
            match mnemonic {
                #build_arms
                _ => None,
            }
        }
    }
}

fn ident_to_upper(i: &Ident) -> Ident {
    Ident::new(&i.to_string().to_uppercase(), i.span())
}
