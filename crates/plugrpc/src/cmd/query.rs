use plugrpc_plugin::{connect_with_config, Datasource, PluginConfig};
use plugrpc_rpc::ConfigValue;

use crate::cmd::QueryArgs;
use crate::exit::{plugin_error, CliResult, SUCCESS};
use crate::output::{print_value, OutputFormat};

pub fn run(args: QueryArgs, format: OutputFormat) -> CliResult<i32> {
    let client = connect_with_config(&args.path, &PluginConfig::new(args.session.codec()))
        .map_err(|err| plugin_error("connect failed", err))?;
    let datasource = client.datasource();

    let config = match &args.prefix {
        Some(prefix) => ConfigValue::map().with("prefix", prefix.as_str()),
        None => ConfigValue::map(),
    };
    let output = datasource
        .configure(&[config])
        .and_then(|()| datasource.execute());
    client.close();

    print_value(&output.map_err(|err| plugin_error("query failed", err))?, format);
    Ok(SUCCESS)
}
