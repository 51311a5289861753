fn main() -> Result<(), Box<dyn std::error::Error>> {
	let proto_file = "../../proto/marquee/health/v1/health.proto";

	// Use a vendored protoc when none is provided by the environment.
	if std::env::var_os("PROTOC").is_none() {
		std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
	}

	tonic_build::configure()
		.build_client(true)
		.build_server(true)
		.compile(&[proto_file], &["../../proto"])?;

	println!("cargo:rerun-if-changed={proto_file}");
	println!("cargo:rerun-if-changed=../../proto/marquee/health/v1");

	Ok(())
}
