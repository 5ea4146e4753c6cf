pub fn print_startup_banner() {
    const RESET: &str = "\x1b[0m";
    const BANNER_COLOR: &str = "\x1b[38;5;30m";
    const DIM_GRAY: &str = "\x1b[2;90m";
    const BANNER: &str = r#"
 _   __            ____  __ _
| | / /___ ___ __ / / /_/ /(_)___  ___
| |/ / __ `/ // // / __/ // / __ \/ -_)
|___/\_,_/\_,_//_/\__/_//_/_/ /_/\__/   "#;
    const APP_DESCRIPTION: &str =
        "Multi-user encoded file server over a line-oriented TCP protocol.";
    const PROTOCOL_HINT: &str =
        "Commands: SIGNUP LOGIN UPLOAD LIST DOWNLOAD DELETE QUIT (one per connection)";
    const LIABILITY_NOTICE: &str =
        "MIT License disclaimer: software is provided \"AS IS\", without warranty or liability.";

    println!("{BANNER_COLOR}");
    println!("{BANNER}{RESET}");
    println!();
    println!(
        "{} v{} | build {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("VAULTLINE_BUILD_DATE_UTC")
    );
    println!("{APP_DESCRIPTION}");
    println!("{DIM_GRAY}{PROTOCOL_HINT}{RESET}");
    println!("{DIM_GRAY}{LIABILITY_NOTICE}{RESET}");
    println!();
    println!("================================================================");
    println!();
}
