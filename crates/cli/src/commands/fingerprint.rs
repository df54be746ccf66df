//! `tether fingerprint`: offline, prints the request identity.

use serde::Serialize;
use tether_protocol::fingerprint;

use super::{CommandContext, request_options};
use crate::cli::RequestArgs;
use crate::error::Result;
use crate::output::{self, ResultBuilder};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintData {
	method: String,
	url: String,
	fingerprint: String,
}

pub fn execute(ctx: &CommandContext, args: &RequestArgs) -> Result<()> {
	let url = ctx.resolve_url(&args.url)?;
	let options = request_options(args)?;
	let fingerprint = fingerprint(options.method.as_ref(), &url, options.body.as_ref());

	let result = ResultBuilder::new("fingerprint")
		.data(FingerprintData {
			method: options.effective_method().to_string(),
			url,
			fingerprint: fingerprint.to_string(),
		})
		.build();
	output::print_result(&result, ctx.format);
	Ok(())
}
