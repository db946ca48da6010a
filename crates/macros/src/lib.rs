use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse::Parse, parse::ParseStream, parse_macro_input, DeriveInput, Expr, ExprArray, Ident,
    LitStr, Token,
};

/// Parsed provider attribute structure
struct ProviderAttr {
    name: String,
    description: String,
    version: String,
    config_keys: Vec<String>,
    tags: Vec<String>,
}

impl Parse for ProviderAttr {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut name = String::new();
        let mut description = String::new();
        let mut version = String::from("0.1.0");
        let mut config_keys = Vec::new();
        let mut tags = Vec::new();

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            if input.peek(LitStr) {
                let val: LitStr = input.parse()?;
                match key.to_string().as_str() {
                    "name" => name = val.value(),
                    "description" => description = val.value(),
                    "version" => version = val.value(),
                    _ => {}
                }
            } else if input.peek(syn::token::Bracket) {
                let content: ExprArray = input.parse()?;
                let vals: Vec<String> = content
                    .elems
                    .iter()
                    .filter_map(|e| {
                        if let Expr::Lit(syn::ExprLit {
                            lit: syn::Lit::Str(s),
                            ..
                        }) = e
                        {
                            Some(s.value())
                        } else {
                            None
                        }
                    })
                    .collect();

                match key.to_string().as_str() {
                    "config_keys" => config_keys = vals,
                    "tags" => tags = vals,
                    _ => {}
                }
            }

            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(ProviderAttr {
            name,
            description,
            version,
            config_keys,
            tags,
        })
    }
}

/// Main macro entry point
#[proc_macro_attribute]
pub fn relay_provider(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let attr = parse_macro_input!(attr as ProviderAttr);

    match emit_provider_code(input, attr) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Code generation logic
fn emit_provider_code(
    input: DeriveInput,
    attr: ProviderAttr,
) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    // Early validation: check required fields
    if attr.name.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Provider 'name' is required",
        ));
    }
    if attr.description.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Provider 'description' is required",
        ));
    }

    let factory_name = quote::format_ident!("{}Factory", name);
    let provider_name_str = &attr.name;
    let description_str = &attr.description;
    let version_str = &attr.version;

    let config_keys_tokens = attr.config_keys.iter().map(|k| quote! { #k.to_string() });
    let tags_tokens = attr.tags.iter().map(|t| quote! { #t.to_string() });

    Ok(quote! {
        #input

        impl #name {
            pub const PROVIDER_ID: &'static str = #provider_name_str;

            pub fn factory() -> std::sync::Arc<dyn relay_shared::ProviderFactory> {
                std::sync::Arc::new(#factory_name)
            }

            fn auto_manifest(&self) -> relay_shared::ProviderManifest {
                relay_shared::ProviderManifest {
                    id: Self::PROVIDER_ID.to_string(),
                    description: #description_str.to_string(),
                    version: #version_str.to_string(),
                    tags: vec![ #(#tags_tokens),* ],
                    required_config_keys: vec![ #(#config_keys_tokens),* ],
                    // Report the SDK the provider was compiled against, not
                    // the provider's own crate version.
                    sdk_version: relay_shared::SDK_VERSION.to_string(),
                }
            }
        }

        pub struct #factory_name;

        #[async_trait::async_trait]
        impl relay_shared::ProviderFactory for #factory_name {
            fn name(&self) -> &str { #provider_name_str }
            async fn create(&self, config: relay_shared::ProviderConfig) -> anyhow::Result<std::sync::Arc<dyn relay_shared::ActionProvider>> {
                let provider = #name::new_provider(config).await?;
                Ok(std::sync::Arc::new(provider))
            }
        }

        relay_shared::inventory::submit! {
            relay_shared::ProviderRegistrar {
                factory: #name::factory,
            }
        }
    })
}
