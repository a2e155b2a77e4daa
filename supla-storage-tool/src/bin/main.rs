use std::path::PathBuf;

use clap::{
    Parser,
    Subcommand,
};
use supla_storage_tool::Image;

#[derive(Parser)]
#[command(name = "supla-storage-tool")]
#[command(about = "supla-storage EEPROM image formatter and inspector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a blank image with a formatted state log
    Format {
        /// Output image file path
        output: PathBuf,

        /// Image size in bytes
        #[arg(short, long, value_parser = parse_size)]
        size: usize,

        /// Start of the state log region
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        reserved_offset: u32,

        /// Size of the state log region, 0 disables the log
        #[arg(long, value_parser = parse_u32, default_value = "512")]
        reserved_size: u32,
    },
    /// Print the state log of an image
    Inspect {
        /// Input image file path
        image: PathBuf,

        /// Start of the state log region
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        reserved_offset: u32,
    },
    /// Print the content of a section as hex
    ReadSection {
        /// Input image file path
        image: PathBuf,

        /// Absolute offset of the section
        #[arg(short, long, value_parser = parse_u32)]
        offset: u32,

        /// Section size without CRC trailer
        #[arg(short, long, value_parser = parse_u16)]
        size: u16,

        /// The section carries a CRC16 trailer
        #[arg(long)]
        crc: bool,

        /// The section has a backup copy, requires --crc
        #[arg(long)]
        backup: bool,
    },
}

fn parse_size(s: &str) -> Result<usize, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse::<usize>().map_err(|e| e.to_string())
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    u32::try_from(parse_size(s)?).map_err(|e| e.to_string())
}

fn parse_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_size(s)?).map_err(|e| e.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Format {
            output,
            size,
            reserved_offset,
            reserved_size,
        } => {
            println!("Formatting {size} byte image...");
            let image = supla_storage_tool::format_image(size, reserved_offset, reserved_size)?;
            image.to_file(&output)?;

            println!("Successfully wrote image: {}", output.display());
            println!("State log: offset {reserved_offset:#x}, size {reserved_size} bytes");

            Ok(())
        }
        Commands::Inspect {
            image,
            reserved_offset,
        } => {
            println!("Reading image: {}", image.display());
            let data = Image::from_file(&image)?;
            let report = supla_storage_tool::inspect(&data, reserved_offset)?;
            print!("{report}");

            Ok(())
        }
        Commands::ReadSection {
            image,
            offset,
            size,
            crc,
            backup,
        } => {
            let data = Image::from_file(&image)?;
            let section = supla_storage_tool::read_section(&data, offset, size, crc, backup)?;
            println!("{}", hex::encode(section));

            Ok(())
        }
    }
}
