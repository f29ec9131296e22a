//! `message_tags!`: declare a tag tree at compile time.
//!
//! ```ignore
//! message_tags! {
//!     pub mod Tags {
//!         Combat {
//!             Damage { Fire; Ice; }
//!         }
//!         #[redirect = "Combat.Damage.Fire"]
//!         Burn;
//!     }
//! }
//!
//! Tags::Combat::Damage::Fire::TAG     // tag_bus::Tag, usable in const context
//! Tags::Combat::Damage::Fire::PATH    // "Combat.Damage.Fire"
//! Tags::DEFINITIONS                   // &[TagDef] for TagRegistry::register_native
//! Tags::REDIRECTS                     // &[RedirectDef] for TagRegistry::register_redirects
//! ```

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{braced, token, Error, Ident, LitStr, Result, Token, Visibility};

use proc_macro_crate::{crate_name, FoundCrate};

/// Maximum supported tree depth (0-7, encoded in 3 bits).
const MAX_DEPTH: usize = 8;

/// Deprecation attribute: #[deprecated] or #[deprecated(note = "...")]
#[derive(Clone, Default)]
struct DeprecationAttr {
    is_deprecated: bool,
    note: Option<String>,
}

#[derive(Clone, Default)]
struct NodeAttrs {
    deprecation: DeprecationAttr,
    /// Redirect target path (#[redirect = "Path.To.Target"])
    redirect_to: Option<LitStr>,
}

struct Node {
    name: Ident,
    attrs: NodeAttrs,
    children: Vec<Node>,
}

struct TagsInput {
    vis: Visibility,
    root: Ident,
    nodes: Vec<Node>,
}

impl Parse for TagsInput {
    fn parse(input: ParseStream) -> Result<Self> {
        let vis: Visibility = input.parse()?;
        input.parse::<Token![mod]>()?;
        let root: Ident = input.parse()?;
        let content;
        braced!(content in input);
        let nodes = parse_nodes(&content)?;
        Ok(Self { vis, root, nodes })
    }
}

fn parse_nodes(input: ParseStream) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    while !input.is_empty() {
        let attrs = parse_attrs(input)?;
        let name: Ident = input.parse()?;

        let children = if input.peek(token::Brace) {
            let content;
            braced!(content in input);
            parse_nodes(&content)?
        } else {
            input.parse::<Token![;]>()?;
            Vec::new()
        };

        if attrs.redirect_to.is_some() && !children.is_empty() {
            return Err(Error::new(
                name.span(),
                format!("'{}' has #[redirect] and children; redirects must be leaves", name),
            ));
        }

        nodes.push(Node {
            name,
            attrs,
            children,
        });
    }
    Ok(nodes)
}

/// Handles `#[deprecated]`, `#[deprecated(note = "...")]` and `#[redirect = "..."]`.
fn parse_attrs(input: ParseStream) -> Result<NodeAttrs> {
    let mut result = NodeAttrs::default();

    while input.peek(Token![#]) {
        input.parse::<Token![#]>()?;
        let content;
        syn::bracketed!(content in input);

        let key: Ident = content.parse()?;

        if key == "deprecated" {
            result.deprecation.is_deprecated = true;

            if content.peek(token::Paren) {
                let inner;
                syn::parenthesized!(inner in content);
                if !inner.is_empty() {
                    let note_key: Ident = inner.parse()?;
                    if note_key != "note" {
                        return Err(Error::new(note_key.span(), "expected `note = \"...\"`"));
                    }
                    inner.parse::<Token![=]>()?;
                    let note: LitStr = inner.parse()?;
                    result.deprecation.note = Some(note.value());
                }
            }
        } else if key == "redirect" {
            content.parse::<Token![=]>()?;
            let target: LitStr = content.parse()?;
            check_path(&target.value(), target.span())?;
            result.redirect_to = Some(target);
        } else {
            return Err(Error::new(
                key.span(),
                format!("unknown tag attribute `{}`; expected `deprecated` or `redirect`", key),
            ));
        }
    }

    Ok(result)
}

/// Same rules as the runtime registry: non-empty segments of alphanumerics,
/// `_` and `-`, at most [`MAX_DEPTH`] of them.
fn check_path(path: &str, span: Span) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.len() > MAX_DEPTH {
        return Err(Error::new(
            span,
            format!("'{}' has {} segments, at most {} are allowed", path, segments.len(), MAX_DEPTH),
        ));
    }
    for seg in &segments {
        let valid = !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::new(span, format!("invalid tag path '{}'", path)));
        }
    }
    Ok(())
}

// =============================================================================
// Tree analysis (runs at macro expansion time)
// =============================================================================

/// Declared node with its computed path.
struct FlatNode {
    segments: Vec<String>,
    depth: u8,
}

/// Flatten the tree. Redirect nodes are skipped; they have no id of their own.
fn flatten_nodes(nodes: &[Node], prefix: &str, depth: u8, out: &mut Vec<FlatNode>) {
    for node in nodes {
        if node.attrs.redirect_to.is_some() {
            continue;
        }

        let path = join(prefix, &node.name);
        let segments: Vec<String> = path.split('.').map(String::from).collect();
        out.push(FlatNode { segments, depth });

        flatten_nodes(&node.children, &path, depth + 1, out);
    }
}

fn collect_redirects(nodes: &[Node], prefix: &str, out: &mut Vec<(String, LitStr)>) {
    for node in nodes {
        let path = join(prefix, &node.name);
        match &node.attrs.redirect_to {
            Some(target) => out.push((path, target.clone())),
            None => collect_redirects(&node.children, &path, out),
        }
    }
}

fn join(prefix: &str, name: &Ident) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

// =============================================================================
// Crate path resolution
// =============================================================================

fn bus_crate_path() -> TokenStream2 {
    match crate_name("tag-bus") {
        Ok(FoundCrate::Itself) => quote!(::tag_bus),
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Err(_) => quote!(::tag_bus),
    }
}

// =============================================================================
// Code generation
// =============================================================================

/// Const expression computing the id of `path`.
fn id_expr(path: &str, krate: &TokenStream2) -> TokenStream2 {
    let segments: Vec<&str> = path.split('.').collect();
    let seg_count = segments.len();
    let seg_lits: Vec<syn::LitByteStr> = segments
        .iter()
        .map(|s| syn::LitByteStr::new(s.as_bytes(), Span::call_site()))
        .collect();
    quote! {{
        const SEGS: [&[u8]; #seg_count] = [#(#seg_lits),*];
        #krate::tag_id::path_id(&SEGS)
    }}
}

/// One module per node, children nested inside their parent's module.
///
/// ```ignore
/// pub mod Combat {
///     pub const PATH: &str = "Combat";
///     pub const DEPTH: u8 = 0;
///     pub const ID: TagId = /* const hash */;
///     pub const TAG: Tag = Tag::from_id(ID);
///
///     pub mod Damage { ... }
/// }
/// ```
fn generate_tags_recursive(
    nodes: &[Node],
    prefix: &str,
    depth: u8,
    krate: &TokenStream2,
) -> Result<Vec<TokenStream2>> {
    let mut output = Vec::new();

    for node in nodes {
        let node_ident = &node.name;
        let path = join(prefix, node_ident);
        if depth as usize >= MAX_DEPTH {
            return Err(Error::new(
                node_ident.span(),
                format!("'{}' is deeper than {} levels", path, MAX_DEPTH),
            ));
        }
        let path_lit = LitStr::new(&path, Span::call_site());

        let deprecation_attr = match (&node.attrs.deprecation, &node.attrs.redirect_to) {
            (DeprecationAttr { is_deprecated: true, note: Some(note) }, _) => {
                quote! { #[deprecated(note = #note)] }
            }
            (DeprecationAttr { is_deprecated: true, note: None }, None) => quote! { #[deprecated] },
            (_, Some(target)) => {
                let note = format!("redirected to {}", target.value());
                quote! { #[deprecated(note = #note)] }
            }
            _ => quote! {},
        };

        if let Some(target) = &node.attrs.redirect_to {
            let id = id_expr(&target.value(), krate);
            output.push(quote! {
                #deprecation_attr
                #[allow(non_snake_case)]
                pub mod #node_ident {
                    /// Retired path.
                    pub const PATH: &'static str = #path_lit;
                    /// Path this tag now resolves to.
                    pub const TARGET: &'static str = #target;
                    pub const ID: #krate::TagId = #id;
                    pub const TAG: #krate::Tag = #krate::Tag::from_id(ID);
                }
            });
            continue;
        }

        let id = id_expr(&path, krate);
        let children = generate_tags_recursive(&node.children, &path, depth + 1, krate)?;

        output.push(quote! {
            #deprecation_attr
            #[allow(non_snake_case)]
            pub mod #node_ident {
                /// Full dot-separated path.
                pub const PATH: &'static str = #path_lit;
                /// Depth in the tag tree (0 = top-level).
                pub const DEPTH: u8 = #depth;
                /// Packed id, computed at compile time.
                pub const ID: #krate::TagId = #id;
                pub const TAG: #krate::Tag = #krate::Tag::from_id(ID);

                #(#children)*
            }
        });
    }

    Ok(output)
}

fn collect_defs(
    nodes: &[Node],
    prefix: &str,
    parent: Option<&str>,
    krate: &TokenStream2,
    out: &mut Vec<TokenStream2>,
) {
    for node in nodes {
        if node.attrs.redirect_to.is_some() {
            continue;
        }

        let path = join(prefix, &node.name);
        let parent_tokens = match parent {
            Some(p) => quote!(::core::option::Option::Some(#p)),
            None => quote!(::core::option::Option::None),
        };

        out.push(quote! {
            #krate::TagDef::new(#path, #parent_tokens),
        });

        collect_defs(&node.children, &path, Some(&path), krate, out);
    }
}

/// Compile-time id collision checks.
///
/// Ids embed their depth, so only nodes on the same level can collide.
fn generate_collision_check(flat: &[FlatNode], krate: &TokenStream2) -> TokenStream2 {
    let mut checks = Vec::new();

    for i in 0..flat.len() {
        for j in (i + 1)..flat.len() {
            if flat[i].depth != flat[j].depth {
                continue;
            }
            let path_i = flat[i].segments.join(".");
            let path_j = flat[j].segments.join(".");
            let id_i = id_expr(&path_i, krate);
            let id_j = id_expr(&path_j, krate);

            let error_msg = format!(
                "tag id collision: '{}' and '{}' hash to the same value",
                path_i, path_j
            );

            checks.push(quote! {
                const _: () = {
                    const ID_A: #krate::TagId = #id_i;
                    const ID_B: #krate::TagId = #id_j;
                    assert!(ID_A != ID_B, #error_msg);
                };
            });
        }
    }

    quote! { #(#checks)* }
}

fn expand(input: TagsInput) -> Result<TokenStream2> {
    let krate = bus_crate_path();

    let mut flat = Vec::new();
    flatten_nodes(&input.nodes, "", 0, &mut flat);

    let tree_depth = flat.iter().map(|n| n.depth as usize + 1).max().unwrap_or(0);
    let node_count = flat.len();

    let tags = generate_tags_recursive(&input.nodes, "", 0, &krate)?;

    let mut defs = Vec::new();
    collect_defs(&input.nodes, "", None, &krate, &mut defs);

    let mut redirects = Vec::new();
    collect_redirects(&input.nodes, "", &mut redirects);
    let redirect_defs = redirects.iter().map(|(from, to)| {
        quote! { #krate::RedirectDef::new(#from, #to), }
    });

    let collision_check = generate_collision_check(&flat, &krate);

    let vis = input.vis;
    let root = input.root;

    Ok(quote! {
        #[allow(non_snake_case, non_camel_case_types, deprecated)]
        #vis mod #root {
            /// Number of tree levels in use.
            pub const TREE_DEPTH: usize = #tree_depth;

            /// Declared nodes, redirects excluded.
            pub const NODE_COUNT: usize = #node_count;

            /// Flat definition table for `TagRegistry::register_native`.
            pub const DEFINITIONS: &'static [#krate::TagDef] = &[
                #(#defs)*
            ];

            /// Redirect table for `TagRegistry::register_redirects`.
            pub const REDIRECTS: &'static [#krate::RedirectDef] = &[
                #(#redirect_defs)*
            ];

            #collision_check

            #(#tags)*
        }
    })
}

/// Declare a tag tree. See the crate docs for the generated items.
#[proc_macro]
pub fn message_tags(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as TagsInput);
    expand(input)
        .unwrap_or_else(Error::into_compile_error)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str) -> Node {
        Node {
            name: Ident::new(name, Span::call_site()),
            attrs: NodeAttrs::default(),
            children: vec![],
        }
    }

    fn branch(name: &str, children: Vec<Node>) -> Node {
        Node {
            children,
            ..leaf(name)
        }
    }

    #[test]
    fn same_name_under_different_parents() {
        // Combat { Attack; } Movement { Attack; }
        let nodes = vec![
            branch("Combat", vec![leaf("Attack")]),
            branch("Movement", vec![leaf("Attack")]),
        ];

        let krate = quote!(::tag_bus);
        let output = generate_tags_recursive(&nodes, "", 0, &krate).unwrap();
        assert_eq!(output.len(), 2);

        let code = quote! { #(#output)* }.to_string();
        assert!(code.contains("pub mod Combat"));
        assert!(code.contains("pub mod Movement"));
        assert!(code.contains("\"Combat.Attack\""));
        assert!(code.contains("\"Movement.Attack\""));
        assert!(!code.contains("pub use"));
    }

    #[test]
    fn redirect_nodes_point_at_target() {
        let mut burn = leaf("Burn");
        burn.attrs.redirect_to = Some(LitStr::new("Combat.Fire", Span::call_site()));
        let nodes = vec![branch("Combat", vec![leaf("Fire")]), burn];

        let mut flat = Vec::new();
        flatten_nodes(&nodes, "", 0, &mut flat);
        assert_eq!(flat.len(), 2);

        let mut redirects = Vec::new();
        collect_redirects(&nodes, "", &mut redirects);
        assert_eq!(redirects.len(), 1);
        assert_eq!(redirects[0].0, "Burn");
        assert_eq!(redirects[0].1.value(), "Combat.Fire");

        let krate = quote!(::tag_bus);
        let output = generate_tags_recursive(&nodes, "", 0, &krate).unwrap();
        let code = quote! { #(#output)* }.to_string();
        assert!(code.contains("redirected to Combat.Fire"));
        assert!(code.contains("TARGET"));
    }

    #[test]
    fn collision_checks_only_pair_same_depth() {
        let nodes = vec![
            branch("A", vec![leaf("X"), leaf("Y")]),
            leaf("B"),
        ];
        let mut flat = Vec::new();
        flatten_nodes(&nodes, "", 0, &mut flat);

        let code = generate_collision_check(&flat, &quote!(::tag_bus)).to_string();
        // (A, B) and (A.X, A.Y)
        assert_eq!(code.matches("assert !").count(), 2);
    }

    #[test]
    fn too_deep_is_an_error() {
        let mut node = leaf("L8");
        for i in (0..8).rev() {
            node = branch(&format!("L{}", i), vec![node]);
        }
        let result = generate_tags_recursive(&[node], "", 0, &quote!(::tag_bus));
        assert!(result.is_err());
    }

    #[test]
    fn path_checks() {
        assert!(check_path("Combat.Damage-Fire_2", Span::call_site()).is_ok());
        assert!(check_path("Combat..Fire", Span::call_site()).is_err());
        assert!(check_path("Combat.Fire!", Span::call_site()).is_err());
        assert!(check_path("A.B.C.D.E.F.G.H.I", Span::call_site()).is_err());
    }
}
