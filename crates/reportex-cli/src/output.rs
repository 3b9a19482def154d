use colored::Colorize;

pub fn print_success(message: &str) {
    println!("{} {message}", "✓".green());
}

pub fn print_error(message: &str) {
    eprintln!("{} {message}", "✗".red());
}
