use super::{
    export_failure, make_exporter, print_report, read_json, spin_fail, spin_ok, spinner,
    template_id,
};
use adcraft_core::{CancelToken, Config, DpaProduct, DpaRequest};
use adcraft_schema::Size;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Accepted shapes of the products file.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProductsFile {
    Products(Vec<DpaProduct>),
    Request(DpaRequest),
}

impl ProductsFile {
    fn into_request(self, sizes: Vec<Size>) -> DpaRequest {
        let mut request = match self {
            ProductsFile::Products(products) => DpaRequest {
                sizes: Vec::new(),
                products,
            },
            ProductsFile::Request(request) => request,
        };
        if !sizes.is_empty() {
            request.sizes = sizes;
        }
        request
    }
}

pub fn run(
    config: &Config,
    template: &str,
    products: &Path,
    sizes: Vec<Size>,
    output: Option<&Path>,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let id = template_id(template)?;
    let request = read_json::<ProductsFile>(products)?.into_request(sizes);
    let exporter = make_exporter(config)?;
    let out = output.map_or_else(|| PathBuf::from(format!("{id}-dpa.tar.gz")), Path::to_path_buf);

    let pb = if json {
        None
    } else {
        Some(spinner(&format!(
            "rendering {} product(s) of {id}...",
            request.products.len()
        )))
    };
    let report = match exporter.export_dpa_to_file(&id, &request, &out, cancel) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("ran {} job(s)", r.jobs.len()));
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "DPA export failed");
            }
            return Err(export_failure(&e));
        }
    };
    print_report(&report, &out, json)
}
