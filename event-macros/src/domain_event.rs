use crate::utils::{apply_derives, expect_ident, expect_str_lit};
use proc_macro::TokenStream;
use quote::quote;
use std::collections::HashSet;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr, Ident, Item, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[domain_event] 宏实现
/// - 仅支持具名字段变体：`Variant { .. }`
/// - 生成 `::event_core::domain_event::EventPayload` 实现
/// - 支持：`#[domain_event(aggregate_type = "...", aggregate_id = field)]`（枚举级默认值）
/// - 变体可覆写：`#[event(event_type = "...", aggregate_id = field)]`
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let mut input = parse_macro_input!(item as Item);

    let enum_item = match &mut input {
        Item::Enum(e) => e,
        other => {
            return syn::Error::new(
                other.span(),
                "#[domain_event] can only be used on enum types",
            )
            .to_compile_error()
            .into();
        }
    };

    // 合并/追加默认派生：Debug, Clone, PartialEq, Serialize, Deserialize
    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(Clone),
        syn::parse_quote!(PartialEq),
        syn::parse_quote!(::serde::Serialize),
        syn::parse_quote!(::serde::Deserialize),
    ];
    apply_derives(&mut enum_item.attrs, required);

    let enum_ident = enum_item.ident.clone();
    let mut variants: Vec<VariantSpec> = Vec::new();
    let mut seen_types: HashSet<String> = HashSet::new();

    for v in &mut enum_item.variants {
        let fields: Vec<Ident> = match &v.fields {
            syn::Fields::Named(named) => named.named.iter().filter_map(|f| f.ident.clone()).collect(),
            _ => {
                return syn::Error::new(
                    v.span(),
                    "#[domain_event] supports only named-field enum variants, e.g., Variant { x: T }",
                )
                .to_compile_error()
                .into();
            }
        };

        let mut retained_attrs = Vec::new();
        let mut variant_cfg = VariantEventAttrConfig::default();
        for attr in v.attrs.iter() {
            if attr.path().is_ident("event") {
                match parse_variant_event_attr(attr) {
                    Ok(parsed) => {
                        if variant_cfg.ty.is_some() && parsed.ty.is_some()
                            || variant_cfg.aggregate_id.is_some() && parsed.aggregate_id.is_some()
                        {
                            return syn::Error::new(
                                attr.span(),
                                "duplicate key specified for this variant",
                            )
                            .to_compile_error()
                            .into();
                        }
                        variant_cfg.ty = variant_cfg.ty.or(parsed.ty);
                        variant_cfg.aggregate_id = variant_cfg.aggregate_id.or(parsed.aggregate_id);
                    }
                    Err(err) => return err.to_compile_error().into(),
                }
            } else {
                retained_attrs.push(attr.clone());
            }
        }
        v.attrs = retained_attrs;

        let event_type = variant_cfg.ty.unwrap_or_else(|| {
            syn::LitStr::new(&format!("{}.{}", enum_ident, v.ident), v.ident.span())
        });
        if !seen_types.insert(event_type.value()) {
            return syn::Error::new(
                event_type.span(),
                format!("duplicate event type '{}'", event_type.value()),
            )
            .to_compile_error()
            .into();
        }

        // 变体级 aggregate_id 必须存在；枚举级默认值仅在变体含该字段时生效
        let aggregate_id = match variant_cfg.aggregate_id {
            Some(field) if !fields.contains(&field) => {
                return syn::Error::new(
                    field.span(),
                    format!("variant `{}` has no field `{}`", v.ident, field),
                )
                .to_compile_error()
                .into();
            }
            Some(field) => Some(field),
            None => cfg
                .aggregate_id
                .as_ref()
                .filter(|field| fields.contains(field))
                .cloned(),
        };

        variants.push(VariantSpec {
            ident: v.ident.clone(),
            fields,
            event_type,
            aggregate_id,
        });
    }

    let type_match_arms = variants.iter().map(|v| {
        let v_ident = &v.ident;
        let lit = &v.event_type;
        quote! { Self::#v_ident { .. } => #lit }
    });

    let all_types = variants.iter().map(|v| &v.event_type);

    let aggregate_type = match &cfg.aggregate_type {
        Some(lit) => quote! { ::std::option::Option::Some(#lit) },
        None => quote! { ::std::option::Option::None },
    };

    let aggregate_id_arms = variants.iter().map(|v| {
        let v_ident = &v.ident;
        match &v.aggregate_id {
            Some(field) => quote! {
                Self::#v_ident { #field, .. } => ::std::option::Option::Some(::std::string::ToString::to_string(#field))
            },
            None => quote! { Self::#v_ident { .. } => ::std::option::Option::None },
        }
    });

    let to_metadata_arms = variants.iter().map(|v| {
        let v_ident = &v.ident;
        let fields = &v.fields;
        let keys = v.fields.iter().map(|f| f.to_string());
        quote! {
            Self::#v_ident { #( #fields ),* } => {
                #( ::event_core::domain_event::encode_field(&mut __map, #keys, #fields)?; )*
            }
        }
    });

    let from_metadata_arms = variants.iter().map(|v| {
        let v_ident = &v.ident;
        let lit = &v.event_type;
        let fields = &v.fields;
        let keys = v.fields.iter().map(|f| f.to_string());
        quote! {
            #lit => ::std::result::Result::Ok(Self::#v_ident {
                #( #fields: ::event_core::domain_event::decode_field(metadata, #keys)?, )*
            })
        }
    });

    let enum_name = enum_ident.to_string();

    let out = quote! {
        #enum_item

        impl ::event_core::domain_event::EventPayload for #enum_ident {
            fn event_type(&self) -> &'static str {
                match self { #( #type_match_arms, )* }
            }

            fn event_types() -> &'static [&'static str] {
                &[ #( #all_types ),* ]
            }

            fn aggregate_type() -> ::std::option::Option<&'static str> {
                #aggregate_type
            }

            fn aggregate_id(&self) -> ::std::option::Option<::std::string::String> {
                match self { #( #aggregate_id_arms, )* }
            }

            #[allow(unused_mut)]
            fn to_metadata(&self) -> ::event_core::error::EventResult<::event_core::domain_event::PayloadMap> {
                // 变体字段会在匹配中绑定为同名变量，局部表名需避开
                let mut __map = ::event_core::domain_event::PayloadMap::new();
                match self { #( #to_metadata_arms )* }
                ::std::result::Result::Ok(__map)
            }

            fn from_metadata(
                event_type: &str,
                metadata: &::event_core::domain_event::PayloadMap,
            ) -> ::event_core::error::EventResult<Self> {
                match event_type {
                    #( #from_metadata_arms, )*
                    other => ::std::result::Result::Err(::event_core::error::EventError::TypeMismatch {
                        expected: ::std::string::ToString::to_string(#enum_name),
                        found: ::std::string::ToString::to_string(other),
                    }),
                }
            }
        }
    };

    TokenStream::from(out)
}

struct VariantSpec {
    ident: Ident,
    fields: Vec<Ident>,
    event_type: syn::LitStr,
    aggregate_id: Option<Ident>,
}

// -------- parsing --------

#[derive(Default)]
struct VariantEventAttrConfig {
    ty: Option<syn::LitStr>,
    aggregate_id: Option<Ident>,
}

fn parse_variant_event_attr(attr: &syn::Attribute) -> Result<VariantEventAttrConfig> {
    match &attr.meta {
        syn::Meta::List(_) => {
            let mut cfg = VariantEventAttrConfig::default();
            let pairs: Punctuated<AttrKv, Token![,]> =
                attr.parse_args_with(Punctuated::<AttrKv, Token![,]>::parse_terminated)?;

            for kv in pairs {
                match kv.key.to_string().as_str() {
                    "event_type" => {
                        if cfg.ty.is_some() {
                            return Err(syn::Error::new(
                                kv.key.span(),
                                "duplicate key 'event_type' in attribute",
                            ));
                        }
                        cfg.ty = Some(expect_str_lit(kv.value, "event_type")?);
                    }
                    "aggregate_id" => {
                        if cfg.aggregate_id.is_some() {
                            return Err(syn::Error::new(
                                kv.key.span(),
                                "duplicate key 'aggregate_id' in attribute",
                            ));
                        }
                        cfg.aggregate_id = Some(expect_ident(kv.value, "aggregate_id")?);
                    }
                    _ => {
                        return Err(syn::Error::new(
                            kv.key.span(),
                            "unknown key; expected 'event_type' | 'aggregate_id'",
                        ));
                    }
                }
            }

            Ok(cfg)
        }
        other => Err(syn::Error::new(other.span(), "expected #[event(...)]")),
    }
}

struct AttrKv {
    key: Ident,
    #[allow(dead_code)]
    eq: Token![=],
    value: Expr,
}

impl Parse for AttrKv {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Self {
            key: input.parse()?,
            eq: input.parse()?,
            value: input.parse()?,
        })
    }
}

// 枚举级配置：聚合类型、默认聚合 ID 字段
#[derive(Default)]
struct EventAttrConfig {
    aggregate_type: Option<syn::LitStr>,
    aggregate_id: Option<Ident>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut cfg = EventAttrConfig::default();

        if input.is_empty() {
            return Ok(cfg);
        }

        let pairs: Punctuated<AttrKv, Token![,]> =
            Punctuated::<AttrKv, Token![,]>::parse_terminated(input)?;

        for kv in pairs {
            match kv.key.to_string().as_str() {
                "aggregate_type" => {
                    if cfg.aggregate_type.is_some() {
                        return Err(syn::Error::new(
                            kv.key.span(),
                            "duplicate key 'aggregate_type' in attribute",
                        ));
                    }
                    cfg.aggregate_type = Some(expect_str_lit(kv.value, "aggregate_type")?);
                }
                "aggregate_id" => {
                    if cfg.aggregate_id.is_some() {
                        return Err(syn::Error::new(
                            kv.key.span(),
                            "duplicate key 'aggregate_id' in attribute",
                        ));
                    }
                    cfg.aggregate_id = Some(expect_ident(kv.value, "aggregate_id")?);
                }
                _ => {
                    return Err(syn::Error::new(
                        kv.key.span(),
                        "unknown key; expected 'aggregate_type' | 'aggregate_id'",
                    ));
                }
            }
        }

        Ok(cfg)
    }
}
