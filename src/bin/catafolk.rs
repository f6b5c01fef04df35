use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    catafolk::app::run(std::env::args().skip(1))
}
