//! Procedural macros for bank-dispatch

use darling::{FromDeriveInput, FromField, FromVariant};
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Container-level attributes for #[derive(Command)]
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(command), supports(enum_any))]
struct CommandOpts {
    ident: syn::Ident,
    generics: syn::Generics,
    data: darling::ast::Data<CommandVariant, ()>,

    /// Path to the core crate, for callers that only see it re-exported
    #[darling(default, rename = "crate")]
    krate: Option<syn::Path>,
}

/// Variant-level attributes
#[derive(Debug, FromVariant)]
#[darling(attributes(command))]
struct CommandVariant {
    ident: syn::Ident,
    fields: darling::ast::Fields<CommandField>,

    /// The command modifies action lists
    #[darling(default)]
    mutating: bool,
}

#[derive(Debug, FromField)]
#[darling(attributes(command))]
struct CommandField {
    ident: Option<syn::Ident>,

    /// Use this field as the target bank instead of a field named `bank`
    #[darling(default)]
    bank: bool,
}

impl CommandVariant {
    fn bank_field(&self) -> Option<&syn::Ident> {
        let named = || {
            self.fields
                .iter()
                .filter_map(|f| f.ident.as_ref())
                .find(|ident| *ident == "bank")
        };
        self.fields
            .iter()
            .find(|f| f.bank)
            .and_then(|f| f.ident.as_ref())
            .or_else(named)
    }
}

/// Derive macro for the Command trait
///
/// Generates:
/// - `name()` returning the variant name
/// - `is_mutating()`, true for variants marked `#[command(mutating)]`
/// - `target_bank()`, the value of the variant's `bank` field (or the field
///   marked `#[command(bank)]`), if it has one
///
/// # Example
/// ```ignore
/// #[derive(Command, Clone, Debug)]
/// enum PanelCommand {
///     List { bank: BankId },
///     #[command(mutating)]
///     Clear { bank: BankId },
///     Refresh,
/// }
///
/// let cmd = PanelCommand::Clear { bank: BankId::new(1, 2) };
/// assert_eq!(cmd.name(), "Clear");
/// assert!(cmd.is_mutating());
/// assert_eq!(cmd.target_bank(), Some(BankId::new(1, 2)));
/// ```
#[proc_macro_derive(Command, attributes(command))]
pub fn derive_command(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match CommandOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    let name = &opts.ident;
    let (impl_generics, ty_generics, where_clause) = opts.generics.split_for_impl();
    let krate = opts
        .krate
        .clone()
        .unwrap_or_else(|| syn::parse_quote!(::bank_dispatch_core));

    let variants = match &opts.data {
        darling::ast::Data::Enum(variants) => variants,
        _ => {
            return syn::Error::new_spanned(&input, "Command can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    let name_arms = variants.iter().map(|v| {
        let variant_name = &v.ident;
        let variant_str = variant_name.to_string();
        quote! { Self::#variant_name { .. } => #variant_str }
    });

    let mutating: Vec<_> = variants
        .iter()
        .filter(|v| v.mutating)
        .map(|v| {
            let variant_name = &v.ident;
            quote! { Self::#variant_name { .. } }
        })
        .collect();
    let is_mutating_body = if mutating.is_empty() {
        quote! { false }
    } else {
        quote! { matches!(self, #(#mutating)|*) }
    };

    let bank_arms: Vec<_> = variants
        .iter()
        .filter_map(|v| {
            let variant_name = &v.ident;
            let field = v.bank_field()?;
            Some(quote! {
                Self::#variant_name { #field, .. } => ::core::option::Option::Some(*#field)
            })
        })
        .collect();

    let expanded = quote! {
        impl #impl_generics #krate::Command for #name #ty_generics #where_clause {
            fn name(&self) -> &'static str {
                match self {
                    #(#name_arms),*
                }
            }

            fn is_mutating(&self) -> bool {
                #is_mutating_body
            }

            #[allow(unreachable_patterns)]
            fn target_bank(&self) -> ::core::option::Option<#krate::BankId> {
                match self {
                    #(#bank_arms,)*
                    _ => ::core::option::Option::None,
                }
            }
        }
    };

    TokenStream::from(expanded)
}
