fn main() -> Result<(), Box<dyn std::error::Error>> {
    mcp_bridge::cli::main()
}
